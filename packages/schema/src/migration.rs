use std::path::{Path, PathBuf};

/// Whether a migration is recorded in the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationStatus {
    /// Not reconciled against the ledger yet
    Unknown,
    Down,
    Up,
    /// Recorded in the ledger but absent from disk
    Missing,
}

impl std::fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(match self {
            Self::Unknown => "unknown",
            Self::Down => "down",
            Self::Up => "up",
            Self::Missing => "missing",
        })
    }
}

/// One migration: an id, a name and its pair of scripts.
///
/// Ids are compared as strings, so `01` and `1` are different migrations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    id: String,
    name: String,
    up: Option<PathBuf>,
    down: Option<PathBuf>,
    status: MigrationStatus,
}

impl Migration {
    /// A migration whose scripts live in `root`
    #[must_use]
    pub fn new(root: &Path, id: impl Into<String>, name: impl Into<String>) -> Self {
        let id = id.into();
        let name = name.into();

        Self {
            up: Some(root.join(format!("{id}_{name}.up.sql"))),
            down: Some(root.join(format!("{id}_{name}.down.sql"))),
            id,
            name,
            status: MigrationStatus::Unknown,
        }
    }

    /// A ledger entry without scripts on disk
    #[must_use]
    pub fn missing(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: "missing".to_string(),
            up: None,
            down: None,
            status: MigrationStatus::Missing,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `<id>_<name>`
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{}_{}", self.id, self.name)
    }

    #[must_use]
    pub const fn up_path(&self) -> Option<&PathBuf> {
        self.up.as_ref()
    }

    #[must_use]
    pub const fn down_path(&self) -> Option<&PathBuf> {
        self.down.as_ref()
    }

    #[must_use]
    pub const fn status(&self) -> MigrationStatus {
        self.status
    }

    pub(crate) const fn set_status(&mut self, status: MigrationStatus) {
        self.status = status;
    }

    /// Applied, including ledger entries missing from disk
    #[must_use]
    pub const fn is_up(&self) -> bool {
        matches!(self.status, MigrationStatus::Up | MigrationStatus::Missing)
    }

    #[must_use]
    pub const fn is_down(&self) -> bool {
        matches!(self.status, MigrationStatus::Down)
    }

    #[must_use]
    pub const fn is_missing(&self) -> bool {
        matches!(self.status, MigrationStatus::Missing)
    }

    /// Fails unless both scripts exist
    ///
    /// # Errors
    ///
    /// * [`crate::MigrationError::AsymmetricalMigration`] if either script is absent
    pub fn validate(&self) -> crate::Result<()> {
        let exists = |path: Option<&PathBuf>| path.is_some_and(|x| x.is_file());

        if exists(self.up.as_ref()) && exists(self.down.as_ref()) {
            Ok(())
        } else {
            Err(crate::MigrationError::AsymmetricalMigration {
                id: self.id.clone(),
                name: self.name.clone(),
            })
        }
    }
}
