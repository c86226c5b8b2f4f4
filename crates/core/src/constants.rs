//! Constants used throughout the nutrition console core crate.
//!
//! Collection names, storage keys and defaults live here so the transports, the
//! batch tooling and the HTTP surface agree on them.

/// Default REST proxy base URL.
pub const DEFAULT_SERVER_URL: &str = "https://base44.app";

/// Default directory for the file-backed document store.
pub const DEFAULT_DOCUMENT_DIR: &str = "nutri_data";

/// Default path of the local key-value state file.
pub const DEFAULT_LOCAL_STATE_FILE: &str = "nutri_data/local_state.json";

/// Default directory for migration snapshots and reports.
pub const DEFAULT_MIGRATION_LOG_DIR: &str = "logs/migrations";

/// Role assigned to a user record created on first sign-in.
pub const DEFAULT_USER_ROLE: &str = "admin";

/// Identity used by the document-store transport when none is configured.
pub const DEFAULT_CONSOLE_USER_ID: &str = "local-admin";

pub const ADMIN_ROLE: &str = "admin";
pub const USER_ROLE: &str = "user";

/// Local key holding the Effects/Cases records.
pub const EFFECTS_CASES_KEY: &str = "supplements_effects_cases_v1";

pub const SOLUBILITY_OPTIONS_KEY: &str = "vitamin_solubility_options_v2";
pub const SOURCE_OPTIONS_KEY: &str = "vitamin_source_options_v2";

pub const DEFAULT_SOLUBILITY_OPTIONS: &[&str] = &["מים", "שמן"];
pub const DEFAULT_SOURCE_OPTIONS: &[&str] = &["הגוף", "המזון"];

/// Label prefixed to the legacy deficiency description when it is folded into the details field.
pub const DEFICIENCY_DESCRIPTION_LABEL: &str = "תיאור החוסר";

/// Minimum number of characters before a global search runs.
pub const MIN_SEARCH_TERM_CHARS: usize = 2;

/// Maximum number of tags kept from a generated tag reply.
pub const MAX_GENERATED_TAGS: usize = 10;
