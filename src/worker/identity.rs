//! Worker identity — the value written into lock records.

use uuid::Uuid;

/// Process-lifetime token identifying this worker.
///
/// A random v4 UUID. Collisions between live workers are not checked for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkerId(String);

impl WorkerId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for WorkerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_differ() {
        assert_ne!(WorkerId::generate(), WorkerId::generate());
    }

    #[test]
    fn display_is_raw_token() {
        let id = WorkerId::from("w-1");
        assert_eq!(id.to_string(), "w-1");
        assert_eq!(id.as_str(), "w-1");
    }
}
