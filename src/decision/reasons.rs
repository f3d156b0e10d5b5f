/// Human-readable trail of how a decision was made.
///
/// Reasons are diagnostic only and never drive control flow. Errors are always reported, infos
/// only when the caller asked for them with [`DecideOption::IncludeReasons`].
///
/// [`DecideOption::IncludeReasons`]: super::DecideOption::IncludeReasons
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecisionReasons {
    include_infos: bool,
    errors: Vec<String>,
    infos: Vec<String>,
}

impl DecisionReasons {
    pub fn new(include_infos: bool) -> DecisionReasons {
        DecisionReasons {
            include_infos,
            errors: Vec::new(),
            infos: Vec::new(),
        }
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.infos.push(message.into());
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    /// Append reasons collected by a nested step.
    pub fn extend(&mut self, other: DecisionReasons) {
        self.errors.extend(other.errors);
        self.infos.extend(other.infos);
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Reasons to surface to the caller: errors first, then infos if they were requested.
    pub fn to_report(&self) -> Vec<String> {
        let infos = if self.include_infos {
            &self.infos[..]
        } else {
            &[]
        };
        self.errors.iter().chain(infos).cloned().collect()
    }
}
