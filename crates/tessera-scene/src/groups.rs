//! Well-known group tags that change how a node is encoded.

/// Exists on one peer only: never replicated, never saved.
pub const SELF_ONLY: &str = "SelfOnly";

/// Skipped by save encoding. Still replicated.
pub const NOT_PERSISTENT: &str = "NotPersistent";

/// Children are omitted from both network and save encodings.
pub const IGNORE_CHILDREN: &str = "IgnoreChildren";

/// Children are omitted from save encodings only.
pub const IGNORE_CHILDREN_SAVE: &str = "IgnoreChildrenSave";

/// Children are omitted from network encodings only.
pub const IGNORE_CHILDREN_NETWORK: &str = "IgnoreChildrenNetwork";
