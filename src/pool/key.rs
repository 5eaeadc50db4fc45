use std::fmt;

/// Identifies a partition: the caller's identity plus the request parameters
/// that make connections non-interchangeable.
///
/// Parameters are kept sorted, so insertion order does not affect equality.
///
/// ```rust
/// use connector_pool::pool::PartitionKey;
///
/// let a = PartitionKey::for_subject("scott").with_param("db", "sales").with_param("role", "ro");
/// let b = PartitionKey::for_subject("scott").with_param("role", "ro").with_param("db", "sales");
/// assert_eq!(a, b);
/// assert_eq!(a.to_string(), "scott[db=sales,role=ro]");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionKey {
    subject: Option<String>,
    params: Vec<(String, String)>,
}

impl PartitionKey {
    /// Key shared by every caller without an identity of its own.
    #[must_use]
    pub fn unauthenticated() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn for_subject(subject: impl Into<String>) -> Self {
        Self {
            subject: Some(subject.into()),
            params: Vec::new(),
        }
    }

    /// Add or replace a request parameter.
    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let value = value.into();
        match self.params.binary_search_by(|(n, _)| n.as_str().cmp(&name)) {
            Ok(idx) => self.params[idx].1 = value,
            Err(idx) => self.params.insert(idx, (name, value)),
        }
        self
    }

    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .binary_search_by(|(n, _)| n.as_str().cmp(name))
            .ok()
            .map(|idx| self.params[idx].1.as_str())
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.subject.as_deref().unwrap_or("<anonymous>"))?;
        if !self.params.is_empty() {
            f.write_str("[")?;
            for (i, (name, value)) in self.params.iter().enumerate() {
                if i > 0 {
                    f.write_str(",")?;
                }
                write!(f, "{name}={value}")?;
            }
            f.write_str("]")?;
        }
        Ok(())
    }
}
