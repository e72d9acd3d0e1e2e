use std::fmt;

const MISSING_RESUME: &str = "No resume data available";

/// The mock-interviewer persona, filled in for one candidate and role.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterviewPrompt {
    pub job_description: String,
    pub resume_summary: Option<String>,
}

impl InterviewPrompt {
    #[must_use]
    pub fn new(job_description: impl Into<String>) -> Self {
        Self {
            job_description: job_description.into(),
            resume_summary: None,
        }
    }

    #[must_use]
    pub fn resume_summary(mut self, summary: impl Into<String>) -> Self {
        self.resume_summary = Some(summary.into());
        self
    }

    #[must_use]
    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for InterviewPrompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let resume = self
            .resume_summary
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(MISSING_RESUME);

        writeln!(
            f,
            "You are conducting a professional mock interview. You are an experienced HR \
             interviewer who is supportive, curious, and professional."
        )?;
        writeln!(f)?;
        writeln!(f, "Job Description:")?;
        writeln!(f, "{}", self.job_description.trim())?;
        writeln!(f)?;
        writeln!(f, "Candidate's Resume Summary:")?;
        writeln!(f, "{resume}")?;
        writeln!(f)?;
        writeln!(f, "Your role:")?;
        for (n, rule) in RULES.iter().enumerate() {
            writeln!(f, "{}. {rule}", n + 1)?;
        }
        writeln!(f)?;
        write!(
            f,
            "Begin by introducing yourself briefly and asking the first question about their background."
        )
    }
}

const RULES: &[&str] = &[
    "Ask interview questions ONE AT A TIME - never list multiple questions",
    "Listen carefully to the candidate's spoken answer",
    "Analyze their answer for clarity (how clearly they explained), confidence (how sure they \
     sounded) and content depth (how well they covered the topic)",
    "After each answer, give a short encouraging remark (under 20 words)",
    "Then ask the NEXT question, logically connected to their previous response",
    "Occasionally increase question difficulty if the candidate performs well",
    "Maintain natural pacing with short pauses between replies",
    "Keep your responses under 60 words",
    "Stay polite and human-like",
    "If they stop responding, gently ask: \"Would you like to continue?\"",
    "Only end if they say \"stop,\" \"end,\" or \"thank you\"",
];
