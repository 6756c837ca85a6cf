//! Storage locations, location modes and dual-location URIs.

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::TableError;

/// A replica of the storage account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageLocation {
    Primary,
    Secondary,
}

impl StorageLocation {
    /// The other replica.
    pub const fn other(self) -> Self {
        match self {
            Self::Primary => Self::Secondary,
            Self::Secondary => Self::Primary,
        }
    }
}

impl std::fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Primary => f.write_str("primary"),
            Self::Secondary => f.write_str("secondary"),
        }
    }
}

/// Which replicas a request may target and in what order (caller option).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LocationMode {
    #[default]
    PrimaryOnly,
    PrimaryThenSecondary,
    SecondaryOnly,
    SecondaryThenPrimary,
}

impl LocationMode {
    /// Location the first attempt is sent to.
    pub const fn initial_location(self) -> StorageLocation {
        match self {
            Self::PrimaryOnly | Self::PrimaryThenSecondary => StorageLocation::Primary,
            Self::SecondaryOnly | Self::SecondaryThenPrimary => StorageLocation::Secondary,
        }
    }

    /// Location for the attempt following one sent to `current`.
    pub const fn next_location(self, current: StorageLocation) -> StorageLocation {
        match self {
            Self::PrimaryOnly => StorageLocation::Primary,
            Self::SecondaryOnly => StorageLocation::Secondary,
            Self::PrimaryThenSecondary | Self::SecondaryThenPrimary => current.other(),
        }
    }
}

/// Which replicas an operation is able to run against (command property).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommandLocationMode {
    #[default]
    PrimaryOnly,
    SecondaryOnly,
    PrimaryOrSecondary,
}

/// Resolve the effective location mode and first location for a call.
///
/// A command pinned to a single replica overrides the caller's mode; asking for
/// the opposite replica explicitly is an argument error.
pub fn resolve_location_mode(
    requested: LocationMode,
    command: CommandLocationMode,
) -> Result<(LocationMode, StorageLocation), TableError> {
    let mode = match command {
        CommandLocationMode::PrimaryOnly => {
            if requested == LocationMode::SecondaryOnly {
                return Err(TableError::invalid_argument(
                    "this operation can only be executed against the primary storage location",
                ));
            }
            LocationMode::PrimaryOnly
        }
        CommandLocationMode::SecondaryOnly => {
            if requested == LocationMode::PrimaryOnly {
                return Err(TableError::invalid_argument(
                    "this operation can only be executed against the secondary storage location",
                ));
            }
            LocationMode::SecondaryOnly
        }
        CommandLocationMode::PrimaryOrSecondary => requested,
    };
    Ok((mode, mode.initial_location()))
}

/// Primary and optional secondary endpoint of the same resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageUri {
    pub primary: Url,
    pub secondary: Option<Url>,
}

impl StorageUri {
    pub fn new(primary: Url, secondary: Option<Url>) -> Self {
        Self { primary, secondary }
    }

    /// Parse a primary endpoint and derive the conventional secondary host
    /// (`<account>-secondary.<suffix>`).
    pub fn with_derived_secondary(primary: &str) -> Result<Self, TableError> {
        let primary = Url::parse(primary)
            .map_err(|e| TableError::Configuration(format!("invalid endpoint '{primary}': {e}")))?;
        let secondary = derive_secondary(&primary);
        Ok(Self { primary, secondary })
    }

    pub fn get(&self, location: StorageLocation) -> Option<&Url> {
        match location {
            StorageLocation::Primary => Some(&self.primary),
            StorageLocation::Secondary => self.secondary.as_ref(),
        }
    }

    /// Resolve the URI for a location, failing when the location is not configured.
    pub fn require(&self, location: StorageLocation) -> Result<&Url, TableError> {
        self.get(location).ok_or_else(|| {
            TableError::invalid_argument(format!(
                "the {location} location is not configured for this resource"
            ))
        })
    }

    /// Append path segments to both endpoints.
    pub fn join(&self, relative: &str) -> Result<Self, TableError> {
        let join = |base: &Url| -> Result<Url, TableError> {
            let mut url = base.clone();
            let path = format!("{}/{}", base.path().trim_end_matches('/'), relative);
            url.set_path(&path);
            Ok(url)
        };
        Ok(Self {
            primary: join(&self.primary)?,
            secondary: self.secondary.as_ref().map(join).transpose()?,
        })
    }
}

fn derive_secondary(primary: &Url) -> Option<Url> {
    let host = primary.domain()?;
    let (account, suffix) = host.split_once('.')?;
    if account.is_empty() || account.ends_with(crate::defaults::protocol::SECONDARY_LOCATION_SUFFIX)
    {
        return None;
    }
    let mut secondary = primary.clone();
    let host = format!(
        "{account}{}.{suffix}",
        crate::defaults::protocol::SECONDARY_LOCATION_SUFFIX
    );
    secondary.set_host(Some(&host)).ok()?;
    Some(secondary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_and_next_locations_follow_mode() {
        assert_eq!(
            LocationMode::SecondaryThenPrimary.initial_location(),
            StorageLocation::Secondary
        );
        assert_eq!(
            LocationMode::PrimaryThenSecondary.next_location(StorageLocation::Primary),
            StorageLocation::Secondary
        );
        assert_eq!(
            LocationMode::PrimaryOnly.next_location(StorageLocation::Secondary),
            StorageLocation::Primary
        );
    }

    #[test]
    fn pinned_command_overrides_mode() {
        let (mode, loc) = resolve_location_mode(
            LocationMode::PrimaryThenSecondary,
            CommandLocationMode::PrimaryOnly,
        )
        .unwrap();
        assert_eq!(mode, LocationMode::PrimaryOnly);
        assert_eq!(loc, StorageLocation::Primary);

        let err = resolve_location_mode(LocationMode::SecondaryOnly, CommandLocationMode::PrimaryOnly)
            .unwrap_err();
        assert!(matches!(err, TableError::InvalidArgument(_)));
    }

    #[test]
    fn derives_secondary_host() {
        let uri = StorageUri::with_derived_secondary("https://acct.table.core.windows.net/").unwrap();
        assert_eq!(
            uri.secondary.unwrap().host_str(),
            Some("acct-secondary.table.core.windows.net")
        );

        let local = StorageUri::with_derived_secondary("http://127.0.0.1:10002/devstore").unwrap();
        assert!(local.secondary.is_none());
    }

    #[test]
    fn join_appends_to_both_endpoints() {
        let uri = StorageUri::with_derived_secondary("https://acct.table.core.windows.net").unwrap();
        let t = uri.join("people").unwrap();
        assert_eq!(t.primary.path(), "/people");
        assert_eq!(t.secondary.unwrap().path(), "/people");
    }
}
