use chrono::{Months, NaiveDate};

pub const GENDERS: [&str; 2] = ["L", "P"];
pub const RELATIONSHIP_TYPES: [&str; 6] = ["ayah", "ibu", "wali", "kakek", "nenek", "saudara"];
pub const MIN_USERNAME_LEN: usize = 3;
pub const MIN_PASSWORD_LEN: usize = 6;

/// Collects form problems in the order they were found.
#[derive(Debug, Default)]
pub struct Checks {
    errors: Vec<String>,
}

impl Checks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the trimmed value, or records "`label` is required."
    pub fn require(&mut self, label: &str, value: Option<String>) -> Option<String> {
        match value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
            Some(v) => Some(v),
            None => {
                self.errors.push(format!("{label} is required."));
                None
            }
        }
    }

    pub fn push(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn extend(&mut self, messages: impl IntoIterator<Item = String>) {
        self.errors.extend(messages);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn into_errors(self) -> Vec<String> {
        self.errors
    }
}

pub fn username_problems(username: &str) -> Vec<String> {
    let mut problems = Vec::new();
    if username.chars().count() < MIN_USERNAME_LEN {
        problems.push(format!("Username must be at least {MIN_USERNAME_LEN} characters."));
    }
    if !username.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        problems.push("Username may only contain letters, numbers and underscores.".to_string());
    }
    problems
}

pub fn password_problem(password: &str) -> Option<String> {
    (password.chars().count() < MIN_PASSWORD_LEN)
        .then(|| format!("Password must be at least {MIN_PASSWORD_LEN} characters."))
}

pub fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && domain.split('.').all(|part| !part.is_empty())
}

pub fn birth_date_problem(raw: &str, today: NaiveDate) -> Option<String> {
    let Ok(date) = NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d") else {
        return Some("Birth date is not a valid YYYY-MM-DD date.".to_string());
    };
    if date > today {
        return Some("Birth date cannot be in the future.".to_string());
    }
    let oldest = today.checked_sub_months(Months::new(12 * 100))?;
    (date < oldest).then(|| "Birth date cannot be more than 100 years ago.".to_string())
}

pub fn parse_gender(raw: &str) -> Option<&'static str> {
    let raw = raw.trim().to_ascii_uppercase();
    GENDERS.into_iter().find(|g| *g == raw)
}

pub fn parse_relationship(raw: &str) -> Option<&'static str> {
    let raw = raw.trim().to_ascii_lowercase();
    RELATIONSHIP_TYPES.into_iter().find(|r| *r == raw)
}
