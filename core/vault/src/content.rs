//! Structured item content.

use std::fmt;

/// Decrypted content of an item.
///
/// Every known variant carries a title and a free-form note. Content
/// written by a newer client that this build cannot interpret is kept as
/// [`ItemContent::Unknown`] so it can be written back unchanged.
#[derive(Clone, PartialEq, Eq)]
pub enum ItemContent {
    Login(LoginContent),
    Note(NoteContent),
    Alias(AliasContent),
    CreditCard(CreditCardContent),
    Identity(IdentityContent),
    Custom(CustomContent),
    Unknown {
        /// Format version the bytes were encoded with.
        format_version: u32,
        /// Decrypted, undecoded bytes.
        raw: Vec<u8>,
    },
}

impl ItemContent {
    /// Item title, if the content is understood.
    pub fn title(&self) -> Option<&str> {
        match self {
            Self::Login(c) => Some(&c.title),
            Self::Note(c) => Some(&c.title),
            Self::Alias(c) => Some(&c.title),
            Self::CreditCard(c) => Some(&c.title),
            Self::Identity(c) => Some(&c.title),
            Self::Custom(c) => Some(&c.title),
            Self::Unknown { .. } => None,
        }
    }

    /// Item note, if the content is understood.
    pub fn note(&self) -> Option<&str> {
        match self {
            Self::Login(c) => Some(&c.note),
            Self::Note(c) => Some(&c.note),
            Self::Alias(c) => Some(&c.note),
            Self::CreditCard(c) => Some(&c.note),
            Self::Identity(c) => Some(&c.note),
            Self::Custom(c) => Some(&c.note),
            Self::Unknown { .. } => None,
        }
    }

    /// Short name of the variant, safe to log.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Login(_) => "login",
            Self::Note(_) => "note",
            Self::Alias(_) => "alias",
            Self::CreditCard(_) => "creditCard",
            Self::Identity(_) => "identity",
            Self::Custom(_) => "custom",
            Self::Unknown { .. } => "unknown",
        }
    }

    /// Check if this is content the build could not interpret.
    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown { .. })
    }
}

impl fmt::Debug for ItemContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Login(c) => f.debug_tuple("Login").field(c).finish(),
            Self::Note(c) => f.debug_tuple("Note").field(c).finish(),
            Self::Alias(c) => f.debug_tuple("Alias").field(c).finish(),
            Self::CreditCard(c) => f.debug_tuple("CreditCard").field(c).finish(),
            Self::Identity(c) => f.debug_tuple("Identity").field(c).finish(),
            Self::Custom(c) => f.debug_tuple("Custom").field(c).finish(),
            Self::Unknown {
                format_version,
                raw,
            } => f
                .debug_struct("Unknown")
                .field("format_version", format_version)
                .field("raw", &format_args!("[{} bytes]", raw.len()))
                .finish(),
        }
    }
}

impl From<LoginContent> for ItemContent {
    fn from(content: LoginContent) -> Self {
        Self::Login(content)
    }
}

impl From<NoteContent> for ItemContent {
    fn from(content: NoteContent) -> Self {
        Self::Note(content)
    }
}

impl From<AliasContent> for ItemContent {
    fn from(content: AliasContent) -> Self {
        Self::Alias(content)
    }
}

impl From<CreditCardContent> for ItemContent {
    fn from(content: CreditCardContent) -> Self {
        Self::CreditCard(content)
    }
}

impl From<IdentityContent> for ItemContent {
    fn from(content: IdentityContent) -> Self {
        Self::Identity(content)
    }
}

impl From<CustomContent> for ItemContent {
    fn from(content: CustomContent) -> Self {
        Self::Custom(content)
    }
}

/// Credentials for a website or application.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct LoginContent {
    pub title: String,
    pub note: String,
    pub username: String,
    pub password: String,
    pub urls: Vec<String>,
    pub totp_uri: Option<String>,
}

impl LoginContent {
    /// Create a login with a username and password.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            ..Self::default()
        }
    }

    /// Set the title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Add a URL the login applies to.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.urls.push(url.into());
        self
    }
}

impl fmt::Debug for LoginContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginContent")
            .field("title", &self.title)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("urls", &self.urls)
            .field("totp_uri", &self.totp_uri.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

/// A free-form secure note.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NoteContent {
    pub title: String,
    pub note: String,
}

impl NoteContent {
    pub fn new(title: impl Into<String>, note: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            note: note.into(),
        }
    }
}

/// A forwarding email alias.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AliasContent {
    pub title: String,
    pub note: String,
    /// The resolved alias address. Always present on a valid alias.
    pub alias_email: String,
}

impl AliasContent {
    pub fn new(alias_email: impl Into<String>) -> Self {
        Self {
            alias_email: alias_email.into(),
            ..Self::default()
        }
    }
}

/// Payment card details.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CreditCardContent {
    pub title: String,
    pub note: String,
    pub cardholder_name: String,
    /// Card number. Always present on a valid card.
    pub number: String,
    pub expiration_date: Option<String>,
    pub verification_code: Option<String>,
    pub pin: Option<String>,
}

impl CreditCardContent {
    pub fn new(cardholder_name: impl Into<String>, number: impl Into<String>) -> Self {
        Self {
            cardholder_name: cardholder_name.into(),
            number: number.into(),
            ..Self::default()
        }
    }
}

impl fmt::Debug for CreditCardContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreditCardContent")
            .field("title", &self.title)
            .field("cardholder_name", &self.cardholder_name)
            .field("number", &"[REDACTED]")
            .field("expiration_date", &self.expiration_date)
            .finish_non_exhaustive()
    }
}

/// Personal identity details.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityContent {
    pub title: String,
    pub note: String,
    pub full_name: String,
    pub email: String,
    pub phone_number: String,
    pub organization: String,
    pub street_address: String,
    pub city: String,
    pub zip_or_postal_code: String,
    pub country_or_region: String,
}

/// A named field of custom content.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CustomField {
    /// Field label. Always present on a valid field.
    pub name: String,
    pub value: String,
    /// Whether the value is concealed by default.
    pub hidden: bool,
}

impl CustomField {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            hidden: false,
        }
    }

    /// A field whose value is concealed by default.
    pub fn hidden(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            hidden: true,
            ..Self::new(name, value)
        }
    }
}

impl fmt::Debug for CustomField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value: &dyn fmt::Debug = if self.hidden {
            &"[REDACTED]"
        } else {
            &self.value
        };
        f.debug_struct("CustomField")
            .field("name", &self.name)
            .field("value", value)
            .field("hidden", &self.hidden)
            .finish()
    }
}

/// User-defined content made of named fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CustomContent {
    pub title: String,
    pub note: String,
    pub fields: Vec<CustomField>,
}
