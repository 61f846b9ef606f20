//! Error types for paramdoc
//!
//! Every failure is a structured [`Error`] carrying the config path of the
//! node it was recorded against, an optional cause and an actionable help
//! message. Whole-document resolution collects failures into an
//! [`ErrorReport`] instead of stopping at the first one.

use std::fmt;

/// Result type alias for paramdoc operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for paramdoc operations
#[derive(Debug, Clone, PartialEq)]
pub struct Error {
    /// The kind of error that occurred
    pub kind: ErrorKind,
    /// Path of the node the error was recorded against (e.g., "train.lr")
    pub path: Option<String>,
    /// Actionable help message
    pub help: Option<String>,
    /// Underlying cause (as string for Clone compatibility)
    pub cause: Option<String>,
}

/// Categories of errors that can occur
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed interpolation syntax
    Parse {
        /// Byte offset of the offending fragment in the raw string
        offset: usize,
        /// The offending fragment
        fragment: String,
    },
    /// Broken or out-of-bounds reference
    Path(PathErrorKind),
    /// Error raised while dispatching to a resolver
    Resolver(ResolverErrorKind),
    /// Circular reference detected
    CircularReference {
        /// Node paths from the first in-progress node back to itself
        chain: Vec<String>,
    },
    /// The node references a node that failed
    Dependency {
        /// Node paths from this node down to the node that failed first
        chain: Vec<String>,
        /// Kind of the root failure
        root: Box<ErrorKind>,
    },
    /// The document itself could not be loaded (YAML/JSON syntax)
    Load,
    /// Type coercion failed
    TypeCoercion,
    /// I/O error (file not found, etc.)
    Io,
}

/// Reference lookup failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathErrorKind {
    /// Ascended past the document root
    OutOfBounds { ascension: usize, available: usize },
    /// A key or index does not exist
    NotFound { segment: String },
    /// Tried to descend into a scalar
    NotIndexable { segment: String },
}

/// Specific resolver error categories
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolverErrorKind {
    /// Unknown resolver
    UnknownResolver { name: String },
    /// Arguments do not match the resolver's signature
    BadArguments { resolver: String, expected: String },
    /// Malformed arithmetic expression
    BadExpression { expression: String },
    /// Lookup table has no entry for the key
    UnknownKey { resolver: String, key: String },
    /// Resolver already registered
    AlreadyRegistered { name: String },
    /// Resolver returned an error
    Custom { resolver: String, message: String },
}

impl Error {
    fn from_kind(kind: ErrorKind) -> Self {
        Self {
            kind,
            path: None,
            help: None,
            cause: None,
        }
    }

    /// Create an interpolation syntax error
    pub fn parse(message: impl Into<String>, offset: usize, fragment: impl Into<String>) -> Self {
        Self {
            cause: Some(message.into()),
            ..Self::from_kind(ErrorKind::Parse {
                offset,
                fragment: fragment.into(),
            })
        }
    }

    /// Create a document load error (invalid YAML/JSON)
    pub fn load(message: impl Into<String>) -> Self {
        Self {
            cause: Some(message.into()),
            ..Self::from_kind(ErrorKind::Load)
        }
    }

    /// Create an I/O error
    pub fn io(message: impl Into<String>) -> Self {
        Self {
            cause: Some(message.into()),
            ..Self::from_kind(ErrorKind::Io)
        }
    }

    /// Create an error for a reference that ascends past the root
    pub fn out_of_bounds(ascension: usize, available: usize) -> Self {
        Self {
            help: Some(format!(
                "Use at most {} extra leading '.' from this position",
                available
            )),
            ..Self::from_kind(ErrorKind::Path(PathErrorKind::OutOfBounds {
                ascension,
                available,
            }))
        }
    }

    /// Create an error for a missing key or index
    pub fn path_not_found(segment: impl Into<String>) -> Self {
        let segment = segment.into();
        Self {
            help: Some(format!(
                "Check that '{}' exists in the configuration",
                segment
            )),
            ..Self::from_kind(ErrorKind::Path(PathErrorKind::NotFound { segment }))
        }
    }

    /// Create an error for descending into a scalar
    pub fn not_indexable(segment: impl Into<String>) -> Self {
        let segment = segment.into();
        Self {
            help: Some(format!(
                "'{}' is a scalar and has no children",
                segment
            )),
            ..Self::from_kind(ErrorKind::Path(PathErrorKind::NotIndexable { segment }))
        }
    }

    /// Create a circular reference error
    pub fn circular_reference(path: impl Into<String>, chain: Vec<String>) -> Self {
        Self {
            path: Some(path.into()),
            help: Some("Break the circular dependency by removing one of the references".into()),
            ..Self::from_kind(ErrorKind::CircularReference { chain })
        }
    }

    /// Wrap the failure of a referenced node.
    ///
    /// The chain starts at `path`, continues through `target` and ends at the
    /// node whose own evaluation failed.
    pub fn dependency(path: impl Into<String>, target: impl Into<String>, failed: &Error) -> Self {
        let path = path.into();
        let target = target.into();
        let mut chain = vec![path.clone()];
        let (root, cause) = match &failed.kind {
            ErrorKind::Dependency { chain: inner, root } => {
                chain.extend(inner.iter().cloned());
                (root.clone(), failed.cause.clone())
            }
            other => {
                chain.push(target);
                (Box::new(other.clone()), Some(failed.headline()))
            }
        };
        Self {
            path: Some(path),
            help: Some("Fix the failing node at the end of the chain".into()),
            cause,
            ..Self::from_kind(ErrorKind::Dependency { chain, root })
        }
    }

    /// Create an unknown resolver error
    pub fn unknown_resolver(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            help: Some(format!("Register the '{}' resolver or check for typos", name)),
            ..Self::from_kind(ErrorKind::Resolver(ResolverErrorKind::UnknownResolver {
                name,
            }))
        }
    }

    /// Create an argument mismatch error
    pub fn bad_arguments(resolver: impl Into<String>, expected: impl Into<String>) -> Self {
        let resolver = resolver.into();
        let expected = expected.into();
        Self {
            help: Some(format!("Call it as ${{{}:{}}}", resolver, expected)),
            ..Self::from_kind(ErrorKind::Resolver(ResolverErrorKind::BadArguments {
                resolver,
                expected,
            }))
        }
    }

    /// Create a malformed arithmetic expression error
    pub fn bad_expression(expression: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            help: Some("Only numbers, + - * / and parentheses are allowed".into()),
            cause: Some(message.into()),
            ..Self::from_kind(ErrorKind::Resolver(ResolverErrorKind::BadExpression {
                expression: expression.into(),
            }))
        }
    }

    /// Create a lookup miss error
    pub fn unknown_key(
        resolver: impl Into<String>,
        key: impl Into<String>,
        known: &[&str],
    ) -> Self {
        Self {
            help: Some(format!("Known keys: {}", known.join(", "))),
            ..Self::from_kind(ErrorKind::Resolver(ResolverErrorKind::UnknownKey {
                resolver: resolver.into(),
                key: key.into(),
            }))
        }
    }

    /// Create a resolver already registered error
    pub fn resolver_already_registered(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            help: Some(format!(
                "Use register_with_force(..., true) to override the '{}' resolver",
                name
            )),
            ..Self::from_kind(ErrorKind::Resolver(ResolverErrorKind::AlreadyRegistered {
                name,
            }))
        }
    }

    /// Create a custom resolver error
    pub fn resolver_custom(resolver: impl Into<String>, message: impl Into<String>) -> Self {
        let resolver = resolver.into();
        Self {
            help: Some(format!("Check the '{}' resolver implementation", resolver)),
            ..Self::from_kind(ErrorKind::Resolver(ResolverErrorKind::Custom {
                resolver,
                message: message.into(),
            }))
        }
    }

    /// Create a type coercion error
    pub fn type_coercion(
        path: impl Into<String>,
        expected: impl Into<String>,
        got: impl Into<String>,
    ) -> Self {
        Self {
            path: Some(path.into()),
            help: Some(format!(
                "Ensure the value can be converted to {}",
                expected.into()
            )),
            cause: Some(format!("Got: {}", got.into())),
            ..Self::from_kind(ErrorKind::TypeCoercion)
        }
    }

    /// Add path context to the error
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Add path context unless the error already carries one
    pub fn or_path(mut self, path: impl Into<String>) -> Self {
        if self.path.is_none() {
            self.path = Some(path.into());
        }
        self
    }

    /// Add help message to the error
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// Check whether this is a circular reference error
    pub fn is_cycle(&self) -> bool {
        matches!(self.kind, ErrorKind::CircularReference { .. })
    }

    /// The first line of the rendered error, without path or help
    pub fn headline(&self) -> String {
        self.kind.to_string()
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Parse { offset, fragment } => {
                write!(f, "Parse error at offset {} near '{}'", offset, fragment)
            }
            ErrorKind::Path(p) => match p {
                PathErrorKind::OutOfBounds {
                    ascension,
                    available,
                } => write!(
                    f,
                    "Reference ascends {} level(s) but only {} are available",
                    ascension, available
                ),
                PathErrorKind::NotFound { segment } => {
                    write!(f, "Referenced path not found: {}", segment)
                }
                PathErrorKind::NotIndexable { segment } => {
                    write!(f, "Cannot descend into scalar: {}", segment)
                }
            },
            ErrorKind::Resolver(r) => match r {
                ResolverErrorKind::UnknownResolver { name } => {
                    write!(f, "Unknown resolver: {}", name)
                }
                ResolverErrorKind::BadArguments { resolver, expected } => {
                    write!(f, "Resolver '{}' expects ({})", resolver, expected)
                }
                ResolverErrorKind::BadExpression { expression } => {
                    write!(f, "Malformed arithmetic expression: '{}'", expression)
                }
                ResolverErrorKind::UnknownKey { resolver, key } => {
                    write!(f, "Resolver '{}' has no entry for '{}'", resolver, key)
                }
                ResolverErrorKind::AlreadyRegistered { name } => {
                    write!(f, "Resolver '{}' is already registered", name)
                }
                ResolverErrorKind::Custom { resolver, message } => {
                    write!(f, "Resolver '{}' error: {}", resolver, message)
                }
            },
            ErrorKind::CircularReference { chain } => {
                write!(f, "Circular reference detected: {}", chain.join(" → "))
            }
            ErrorKind::Dependency { chain, .. } => {
                write!(f, "Depends on a failed node: {}", chain.join(" → "))
            }
            ErrorKind::Load => write!(f, "Failed to load document"),
            ErrorKind::TypeCoercion => write!(f, "Type coercion failed"),
            ErrorKind::Io => write!(f, "I/O error"),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;

        if let Some(path) = &self.path {
            write!(f, "\n  Path: {}", path)?;
        }

        if let Some(cause) = &self.cause {
            write!(f, "\n  {}", cause)?;
        }

        if let Some(help) = &self.help {
            write!(f, "\n  Help: {}", help)?;
        }

        Ok(())
    }
}

impl std::error::Error for Error {}

/// Every failed leaf of one resolution pass, in document order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ErrorReport {
    errors: Vec<Error>,
}

impl ErrorReport {
    /// Create an empty report
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure
    pub fn push(&mut self, error: Error) {
        self.errors.push(error);
    }

    /// True when the pass had no failures
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Number of failed leaves
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Iterate over the recorded failures
    pub fn iter(&self) -> std::slice::Iter<'_, Error> {
        self.errors.iter()
    }

    /// The failure recorded against `path`, if any
    pub fn get(&self, path: &str) -> Option<&Error> {
        self.errors.iter().find(|e| e.path.as_deref() == Some(path))
    }

    /// Consume the report, returning the failures
    pub fn into_errors(self) -> Vec<Error> {
        self.errors
    }
}

impl<'a> IntoIterator for &'a ErrorReport {
    type Item = &'a Error;
    type IntoIter = std::slice::Iter<'a, Error>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.iter()
    }
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} node(s) failed to resolve", self.errors.len())?;
        for err in &self.errors {
            write!(f, "\n\n{}", err)?;
        }
        Ok(())
    }
}
