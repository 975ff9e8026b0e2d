use serde::{Deserialize, Serialize};

/// Kind of item stored in secure storage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemClass {
    #[default]
    GenericPassword,
    InternetPassword,
}

impl ItemClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemClass::GenericPassword => "genp",
            ItemClass::InternetPassword => "inet",
        }
    }
}

/// When a stored item may be read.
///
/// The named levels map onto the platform's raw accessibility values. The
/// "always" levels are not named; reach them with [`Accessibility::Custom`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Accessibility {
    /// Readable after the first unlock following a restart. Migrates with encrypted backups.
    AfterFirstUnlock,
    /// Like `AfterFirstUnlock`, but never leaves this device.
    AfterFirstUnlockThisDeviceOnly,
    /// Only while unlocked, and only while a passcode is set.
    WhenPasscodeSetThisDeviceOnly,
    /// Only while the device is unlocked.
    #[default]
    WhenUnlocked,
    /// Like `WhenUnlocked`, but never leaves this device.
    WhenUnlockedThisDeviceOnly,
    /// Any other raw platform value.
    Custom(String),
}

impl Accessibility {
    /// Raw attribute value understood by the platform.
    pub fn raw_value(&self) -> &str {
        match self {
            Accessibility::AfterFirstUnlock => "ck",
            Accessibility::AfterFirstUnlockThisDeviceOnly => "cku",
            Accessibility::WhenPasscodeSetThisDeviceOnly => "akpu",
            Accessibility::WhenUnlocked => "ak",
            Accessibility::WhenUnlockedThisDeviceOnly => "aku",
            Accessibility::Custom(raw) => raw.as_str(),
        }
    }

    /// Inverse of [`Accessibility::raw_value`]; unknown values become `Custom`.
    pub fn from_raw_value(raw: &str) -> Self {
        match raw {
            "ck" => Accessibility::AfterFirstUnlock,
            "cku" => Accessibility::AfterFirstUnlockThisDeviceOnly,
            "akpu" => Accessibility::WhenPasscodeSetThisDeviceOnly,
            "ak" => Accessibility::WhenUnlocked,
            "aku" => Accessibility::WhenUnlockedThisDeviceOnly,
            other => Accessibility::Custom(other.to_string()),
        }
    }
}

/// Attributes a backend keeps alongside a stored payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemAttributes {
    pub class: ItemClass,
    pub service: String,
    pub account: String,
    pub generic: Option<Vec<u8>>,
    pub access_group: Option<String>,
    pub accessible: Accessibility,
    pub synchronizable: bool,
}

impl ItemAttributes {
    /// Stable identity of the item: two items with the same identity cannot coexist.
    /// Each field is length-prefixed, so no field content can forge a separator.
    pub fn identity(&self) -> String {
        let group = match &self.access_group {
            Some(group) => format!("{}:{group}", group.len()),
            None => "-".to_string(),
        };
        format!(
            "{}|{}:{}|{}|{}:{}",
            self.class.as_str(),
            self.service.len(),
            self.service,
            group,
            self.account.len(),
            self.account
        )
    }
}

/// Typed description of a secure-storage lookup or write.
///
/// Every field left as `None` acts as a wildcard when matching. The return
/// flags only affect reads: a backend fills the payload of a match only when
/// `return_data` is set, and the persistent reference only when
/// `return_persistent_ref` is set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemQuery {
    pub class: ItemClass,
    pub service: Option<String>,
    pub account: Option<String>,
    pub generic: Option<Vec<u8>>,
    pub access_group: Option<String>,
    pub accessible: Option<Accessibility>,
    pub synchronizable: Option<bool>,
    pub return_data: bool,
    pub return_persistent_ref: bool,
}

impl ItemQuery {
    pub fn generic_password() -> Self {
        Self::default()
    }

    pub fn internet_password() -> Self {
        Self {
            class: ItemClass::InternetPassword,
            ..Self::default()
        }
    }

    pub fn service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    pub fn account(mut self, account: impl Into<String>) -> Self {
        self.account = Some(account.into());
        self
    }

    pub fn generic(mut self, generic: impl Into<Vec<u8>>) -> Self {
        self.generic = Some(generic.into());
        self
    }

    pub fn access_group(mut self, group: impl Into<String>) -> Self {
        self.access_group = Some(group.into());
        self
    }

    pub fn accessible(mut self, accessible: Accessibility) -> Self {
        self.accessible = Some(accessible);
        self
    }

    pub fn synchronizable(mut self, synchronizable: bool) -> Self {
        self.synchronizable = Some(synchronizable);
        self
    }

    pub fn return_data(mut self, enabled: bool) -> Self {
        self.return_data = enabled;
        self
    }

    pub fn return_persistent_ref(mut self, enabled: bool) -> Self {
        self.return_persistent_ref = enabled;
        self
    }

    /// True when every attribute this query sets equals the stored one.
    pub fn matches(&self, attrs: &ItemAttributes) -> bool {
        self.class == attrs.class
            && field_matches(self.service.as_ref(), &attrs.service)
            && field_matches(self.account.as_ref(), &attrs.account)
            && self
                .generic
                .as_ref()
                .is_none_or(|g| attrs.generic.as_ref() == Some(g))
            && self
                .access_group
                .as_ref()
                .is_none_or(|g| attrs.access_group.as_ref() == Some(g))
            && field_matches(self.accessible.as_ref(), &attrs.accessible)
            && field_matches(self.synchronizable.as_ref(), &attrs.synchronizable)
    }

    /// Attributes an `add` with this query stores, or `None` when service or
    /// account is missing.
    pub fn attributes(&self) -> Option<ItemAttributes> {
        Some(ItemAttributes {
            class: self.class,
            service: self.service.clone()?,
            account: self.account.clone()?,
            generic: self.generic.clone(),
            access_group: self.access_group.clone(),
            accessible: self.accessible.clone().unwrap_or_default(),
            synchronizable: self.synchronizable.unwrap_or(false),
        })
    }
}

fn field_matches<T: PartialEq>(wanted: Option<&T>, stored: &T) -> bool {
    wanted.is_none_or(|w| w == stored)
}
