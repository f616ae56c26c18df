use serde::Deserialize;

pub const CREATE_ACTION: &str = "coworking.operating_hours.create";
pub const UPDATE_ACTION: &str = "coworking.operating_hours.update";
pub const DELETE_ACTION: &str = "coworking.operating_hours.delete";

/// Resource path of the operating-hours collection.
pub const HOURS_RESOURCE: &str = "coworking/operating_hours";

/// Resource path of a single operating-hours entry.
pub fn hours_resource(id: impl std::fmt::Display) -> String {
    format!("{HOURS_RESOURCE}/{id}")
}

/// The authenticated caller of a mutation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subject {
    pub name: String,
}

impl Subject {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl std::fmt::Display for Subject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionDenied {
    pub subject: String,
    pub action: String,
    pub resource: String,
}

impl std::fmt::Display for PermissionDenied {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} is not permitted to {} on {}",
            self.subject, self.action, self.resource
        )
    }
}

impl std::error::Error for PermissionDenied {}

/// Capability check consulted before every mutation.
pub trait PermissionChecker: Send + Sync {
    fn enforce(&self, subject: &Subject, action: &str, resource: &str) -> Result<(), PermissionDenied>;
}

/// One permission: `subject` may perform `action` on `resource`.
/// Action and resource are patterns where `*` matches any run of characters;
/// a subject of `*` applies to everyone.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Grant {
    pub subject: String,
    pub action: String,
    pub resource: String,
}

impl Grant {
    pub fn new(subject: impl Into<String>, action: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            action: action.into(),
            resource: resource.into(),
        }
    }

    /// Unrestricted access for `subject`.
    pub fn admin(subject: impl Into<String>) -> Self {
        Self::new(subject, "*", "*")
    }

    pub fn allows(&self, subject: &Subject, action: &str, resource: &str) -> bool {
        (self.subject == "*" || self.subject == subject.name)
            && glob_match(&self.action, action)
            && glob_match(&self.resource, resource)
    }
}

/// Grant-list checker. Denies anything not explicitly granted.
#[derive(Debug, Default, Clone)]
pub struct GrantTable {
    grants: Vec<Grant>,
}

impl GrantTable {
    pub fn new(grants: Vec<Grant>) -> Self {
        Self { grants }
    }

    /// Parse a JSON array of `{"subject", "action", "resource"}` objects.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let grants: Vec<Grant> = serde_json::from_str(json)?;
        Ok(Self::new(grants))
    }

    pub fn push(&mut self, grant: Grant) {
        self.grants.push(grant);
    }

    pub fn len(&self) -> usize {
        self.grants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }
}

impl PermissionChecker for GrantTable {
    fn enforce(&self, subject: &Subject, action: &str, resource: &str) -> Result<(), PermissionDenied> {
        if self.grants.iter().any(|g| g.allows(subject, action, resource)) {
            Ok(())
        } else {
            Err(PermissionDenied {
                subject: subject.name.clone(),
                action: action.to_string(),
                resource: resource.to_string(),
            })
        }
    }
}

/// Match `text` against `pattern`, where `*` matches any (possibly empty) run.
fn glob_match(pattern: &str, text: &str) -> bool {
    let mut parts = pattern.split('*');
    // split always yields at least one element
    let first = parts.next().unwrap_or("");
    let Some(mut rest) = text.strip_prefix(first) else {
        return false;
    };
    let parts: Vec<&str> = parts.collect();
    let Some((last, middle)) = parts.split_last() else {
        // no '*' in pattern: exact match
        return rest.is_empty();
    };
    for part in middle {
        match rest.find(part) {
            Some(pos) => rest = &rest[pos + part.len()..],
            None => return false,
        }
    }
    rest.len() >= last.len() && rest.ends_with(last)
}
