//! Key types for the dependency graph.
//!
//! A [`NodeKey`] uniquely identifies one computation: a [`FamilyName`] naming
//! the registered function that computes it, plus an opaque argument string.
//! Keys are value-equal and hashable; two keys with the same family and
//! argument always denote the same graph node.

use std::fmt;
use std::sync::Arc;

/// Name of a key family.
///
/// A family selects which registered function computes keys of this kind.
/// The name is reference-counted, so cloning a `FamilyName` is cheap.
///
/// # Examples
///
/// ```
/// use skein::FamilyName;
///
/// let family = FamilyName::new("file_state");
/// assert_eq!(family.as_str(), "file_state");
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FamilyName(Arc<str>);

impl FamilyName {
    /// Creates a new family name.
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    /// Returns the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FamilyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for FamilyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FamilyName({})", self.0)
    }
}

impl From<&str> for FamilyName {
    fn from(s: &str) -> Self {
        FamilyName::new(s)
    }
}

impl From<String> for FamilyName {
    fn from(s: String) -> Self {
        Self(Arc::from(s.as_str()))
    }
}

/// Unique identifier for one node of the dependency graph.
///
/// A key is a `(family, argument)` pair. The family names the compute
/// function; the argument is an opaque token the function interprets. The
/// `Display` form is `family:argument`, which is also the spelling used in
/// error messages.
///
/// # Examples
///
/// ```
/// use skein::NodeKey;
///
/// let key = NodeKey::new("package", "//base");
/// assert_eq!(key.family().as_str(), "package");
/// assert_eq!(key.argument(), "//base");
/// assert_eq!(key.to_string(), "package://base");
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey {
    family: FamilyName,
    argument: Arc<str>,
}

impl NodeKey {
    /// Creates a key from a family and an argument.
    pub fn new(family: impl Into<FamilyName>, argument: impl AsRef<str>) -> Self {
        Self {
            family: family.into(),
            argument: Arc::from(argument.as_ref()),
        }
    }

    /// Returns the key's family.
    pub fn family(&self) -> &FamilyName {
        &self.family
    }

    /// Returns the key's argument.
    pub fn argument(&self) -> &str {
        &self.argument
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.family, self.argument)
    }
}

impl fmt::Debug for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeKey({})", self)
    }
}
