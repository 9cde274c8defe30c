//! Versioned encoding and encryption of item content.
//!
//! Content is first serialized in the layout named by its format version,
//! then sealed to the item key.
//!
//! | version | layout |
//! |---------|--------|
//! | 1       | JSON (legacy) |
//! | 2       | CBOR (current) |
//!
//! Newer versions, and item types this build does not know, decode to
//! [`ItemContent::Unknown`] and re-encode byte for byte.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use zeroize::Zeroizing;

use crate::content::{
    AliasContent, CreditCardContent, CustomContent, CustomField, IdentityContent, ItemContent,
    LoginContent, NoteContent,
};
use crate::keys::ItemKey;
use keyward_common::{Error, Result};
use keyward_crypto::{CryptoProvider, KeyPacket, SealContext};
use keyward_remote::EncryptedItemContent;

/// Format version of the legacy JSON layout.
pub const LEGACY_FORMAT_VERSION: u32 = 1;

/// Format version written by this build.
pub const CURRENT_FORMAT_VERSION: u32 = 2;

/// Serialization layout of a format version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentFormat {
    LegacyJson,
    Cbor,
}

impl ContentFormat {
    /// The layout new content is written in.
    pub const CURRENT: Self = Self::Cbor;

    /// Parse a format version.
    ///
    /// # Errors
    /// - `UnknownContentFormat` for versions newer than this build supports
    /// - `Integrity` for version 0, which no client ever wrote
    pub fn from_version(version: u32) -> Result<Self> {
        match version {
            LEGACY_FORMAT_VERSION => Ok(Self::LegacyJson),
            CURRENT_FORMAT_VERSION => Ok(Self::Cbor),
            0 => Err(Error::Integrity("Invalid content format version 0".to_string())),
            other => Err(Error::UnknownContentFormat(other)),
        }
    }

    /// The version number of this layout.
    pub fn version(self) -> u32 {
        match self {
            Self::LegacyJson => LEGACY_FORMAT_VERSION,
            Self::Cbor => CURRENT_FORMAT_VERSION,
        }
    }

    fn serialize(self, record: &ContentRecord) -> Result<Zeroizing<Vec<u8>>> {
        let mut bytes = Zeroizing::new(Vec::new());
        match self {
            Self::LegacyJson => serde_json::to_writer(&mut *bytes, record)
                .map_err(|e| Error::Serialization(e.to_string()))?,
            Self::Cbor => ciborium::ser::into_writer(record, &mut *bytes)
                .map_err(|e| Error::Serialization(e.to_string()))?,
        }
        Ok(bytes)
    }

    fn deserialize(self, bytes: &[u8]) -> Result<ContentRecord> {
        match self {
            Self::LegacyJson => serde_json::from_slice(bytes)
                .map_err(|e| Error::Integrity(format!("Malformed content: {}", e))),
            Self::Cbor => ciborium::de::from_reader(bytes)
                .map_err(|e| Error::Integrity(format!("Malformed content: {}", e))),
        }
    }
}

/// Serialized field layout shared by every format version.
///
/// Every field except the type tag is optional on the wire, so that
/// required-field checks happen in one place with a precise error.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContentRecord {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    note: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    urls: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    totp_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    alias_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cardholder_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expiration_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    verification_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    identity: Option<IdentityRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    fields: Option<Vec<FieldRecord>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct IdentityRecord {
    full_name: String,
    email: String,
    phone_number: String,
    organization: String,
    street_address: String,
    city: String,
    zip_or_postal_code: String,
    country_or_region: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FieldRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default)]
    value: String,
    #[serde(default)]
    hidden: bool,
}

fn required(value: Option<String>, kind: &str, field: &str) -> Result<String> {
    value.ok_or_else(|| Error::Integrity(format!("{} content is missing {}", kind, field)))
}

impl ContentRecord {
    fn from_content(content: &ItemContent) -> Option<Self> {
        let record = match content {
            ItemContent::Login(c) => Self {
                kind: "login".to_string(),
                title: c.title.clone(),
                note: c.note.clone(),
                username: Some(c.username.clone()),
                password: Some(c.password.clone()),
                urls: Some(c.urls.clone()),
                totp_uri: c.totp_uri.clone(),
                ..Self::default()
            },
            ItemContent::Note(c) => Self {
                kind: "note".to_string(),
                title: c.title.clone(),
                note: c.note.clone(),
                ..Self::default()
            },
            ItemContent::Alias(c) => Self {
                kind: "alias".to_string(),
                title: c.title.clone(),
                note: c.note.clone(),
                alias_email: Some(c.alias_email.clone()),
                ..Self::default()
            },
            ItemContent::CreditCard(c) => Self {
                kind: "creditCard".to_string(),
                title: c.title.clone(),
                note: c.note.clone(),
                cardholder_name: Some(c.cardholder_name.clone()),
                number: Some(c.number.clone()),
                expiration_date: c.expiration_date.clone(),
                verification_code: c.verification_code.clone(),
                pin: c.pin.clone(),
                ..Self::default()
            },
            ItemContent::Identity(c) => Self {
                kind: "identity".to_string(),
                title: c.title.clone(),
                note: c.note.clone(),
                identity: Some(IdentityRecord {
                    full_name: c.full_name.clone(),
                    email: c.email.clone(),
                    phone_number: c.phone_number.clone(),
                    organization: c.organization.clone(),
                    street_address: c.street_address.clone(),
                    city: c.city.clone(),
                    zip_or_postal_code: c.zip_or_postal_code.clone(),
                    country_or_region: c.country_or_region.clone(),
                }),
                ..Self::default()
            },
            ItemContent::Custom(c) => Self {
                kind: "custom".to_string(),
                title: c.title.clone(),
                note: c.note.clone(),
                fields: Some(
                    c.fields
                        .iter()
                        .map(|field| FieldRecord {
                            name: Some(field.name.clone()),
                            value: field.value.clone(),
                            hidden: field.hidden,
                        })
                        .collect(),
                ),
                ..Self::default()
            },
            ItemContent::Unknown { .. } => return None,
        };
        Some(record)
    }

    /// Convert into content. Unrecognized type tags yield `None`.
    fn into_content(self) -> Result<Option<ItemContent>> {
        let content = match self.kind.as_str() {
            "login" => ItemContent::Login(LoginContent {
                title: self.title,
                note: self.note,
                username: self.username.unwrap_or_default(),
                password: self.password.unwrap_or_default(),
                urls: self.urls.unwrap_or_default(),
                totp_uri: self.totp_uri,
            }),
            "note" => ItemContent::Note(NoteContent {
                title: self.title,
                note: self.note,
            }),
            "alias" => ItemContent::Alias(AliasContent {
                alias_email: required(self.alias_email, "Alias", "alias email")?,
                title: self.title,
                note: self.note,
            }),
            "creditCard" => ItemContent::CreditCard(CreditCardContent {
                number: required(self.number, "Credit card", "number")?,
                title: self.title,
                note: self.note,
                cardholder_name: self.cardholder_name.unwrap_or_default(),
                expiration_date: self.expiration_date,
                verification_code: self.verification_code,
                pin: self.pin,
            }),
            "identity" => {
                let identity = self.identity.unwrap_or_default();
                ItemContent::Identity(IdentityContent {
                    title: self.title,
                    note: self.note,
                    full_name: identity.full_name,
                    email: identity.email,
                    phone_number: identity.phone_number,
                    organization: identity.organization,
                    street_address: identity.street_address,
                    city: identity.city,
                    zip_or_postal_code: identity.zip_or_postal_code,
                    country_or_region: identity.country_or_region,
                })
            }
            "custom" => {
                let fields = self
                    .fields
                    .unwrap_or_default()
                    .into_iter()
                    .map(|field| {
                        Ok(CustomField {
                            name: required(field.name, "Custom field", "name")?,
                            value: field.value,
                            hidden: field.hidden,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                ItemContent::Custom(CustomContent {
                    title: self.title,
                    note: self.note,
                    fields,
                })
            }
            _ => return Ok(None),
        };
        Ok(Some(content))
    }
}

/// Encodes and decodes item content under an item key.
#[derive(Clone)]
pub struct ContentCodec {
    crypto: Arc<dyn CryptoProvider>,
}

impl ContentCodec {
    pub fn new(crypto: Arc<dyn CryptoProvider>) -> Self {
        Self { crypto }
    }

    /// Encode content in the current layout and seal it to the item key.
    ///
    /// `Unknown` content is sealed as-is under the version it came with.
    pub fn encode(&self, content: &ItemContent, item_key: &ItemKey) -> Result<EncryptedItemContent> {
        match content {
            ItemContent::Unknown {
                format_version,
                raw,
            } => self.seal(raw, *format_version, item_key),
            known => self.encode_as(known, ContentFormat::CURRENT, item_key),
        }
    }

    /// Encode known content in a specific layout.
    ///
    /// # Errors
    /// - `InvalidInput` for `Unknown` content
    pub fn encode_as(
        &self,
        content: &ItemContent,
        format: ContentFormat,
        item_key: &ItemKey,
    ) -> Result<EncryptedItemContent> {
        let record = ContentRecord::from_content(content).ok_or_else(|| {
            Error::InvalidInput("Unknown content keeps its own format version".to_string())
        })?;
        let plaintext = format.serialize(&record)?;
        self.seal(&plaintext, format.version(), item_key)
    }

    /// Open and decode content.
    ///
    /// # Errors
    /// - `DecryptionFailure` for the wrong item key or corrupted ciphertext
    /// - `Integrity` for malformed plaintext or a missing required field
    pub fn decode(&self, blob: &EncryptedItemContent, item_key: &ItemKey) -> Result<ItemContent> {
        let packet = KeyPacket::from_bytes(blob.content.clone());
        let plaintext =
            self.crypto
                .unseal(item_key.private_key(), &packet, SealContext::ItemContent)?;

        let format = match ContentFormat::from_version(blob.content_format_version) {
            Ok(format) => format,
            Err(Error::UnknownContentFormat(version)) => {
                debug!(format_version = version, "Keeping content of a newer format");
                return Ok(ItemContent::Unknown {
                    format_version: version,
                    raw: plaintext.as_bytes().to_vec(),
                });
            }
            Err(e) => return Err(e),
        };

        let record = format.deserialize(plaintext.as_bytes())?;
        let kind = record.kind.clone();
        match record.into_content()? {
            Some(content) => Ok(content),
            None => {
                debug!(kind = %kind, "Keeping content of an unknown type");
                Ok(ItemContent::Unknown {
                    format_version: blob.content_format_version,
                    raw: plaintext.as_bytes().to_vec(),
                })
            }
        }
    }

    fn seal(
        &self,
        plaintext: &[u8],
        format_version: u32,
        item_key: &ItemKey,
    ) -> Result<EncryptedItemContent> {
        let packet = self
            .crypto
            .seal(item_key.public_key(), plaintext, SealContext::ItemContent)?;
        Ok(EncryptedItemContent {
            content_format_version: format_version,
            content: packet.into_bytes(),
        })
    }
}
