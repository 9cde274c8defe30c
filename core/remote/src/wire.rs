//! Payloads exchanged with the server.
//!
//! Field names are part of the server contract and serialize in camelCase.
//! Binary fields travel as standard base64 strings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use keyward_common::{ItemId, Revision, RotationId, ShareId, VaultId};
use keyward_crypto::{KeyPacket, PublicKey, Signature};

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// Canonical bytes signed over an item key packet: `rotationId || 0x00 || packet`.
pub fn item_key_packet_message(rotation_id: &RotationId, packet: &KeyPacket) -> Vec<u8> {
    let mut message = Vec::with_capacity(rotation_id.as_str().len() + 1 + packet.as_bytes().len());
    message.extend_from_slice(rotation_id.as_str().as_bytes());
    message.push(0);
    message.extend_from_slice(packet.as_bytes());
    message
}

/// Canonical bytes signed over a vault key record:
/// `rotationId || 0x00 || rotation (u64, big endian) || packet`.
///
/// The primary and active flags are server-managed and not covered.
pub fn vault_key_record_message(
    rotation_id: &RotationId,
    rotation: u64,
    packet: &KeyPacket,
) -> Vec<u8> {
    let mut message = Vec::with_capacity(rotation_id.as_str().len() + 9 + packet.as_bytes().len());
    message.extend_from_slice(rotation_id.as_str().as_bytes());
    message.push(0);
    message.extend_from_slice(&rotation.to_be_bytes());
    message.extend_from_slice(packet.as_bytes());
    message
}

/// Encrypted item content together with the format version it was encoded with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedItemContent {
    /// Encoding that was used before encryption.
    pub content_format_version: u32,
    /// Content sealed to the item key.
    #[serde(with = "base64_bytes")]
    pub content: Vec<u8>,
}

impl EncryptedItemContent {
    /// Canonical bytes covered by both content signatures:
    /// `rotationId || 0x00 || format version (u32, big endian) || content`.
    pub fn signed_message(&self, rotation_id: &RotationId) -> Vec<u8> {
        let mut message =
            Vec::with_capacity(rotation_id.as_str().len() + 5 + self.content.len());
        message.extend_from_slice(rotation_id.as_str().as_bytes());
        message.push(0);
        message.extend_from_slice(&self.content_format_version.to_be_bytes());
        message.extend_from_slice(&self.content);
        message
    }
}

/// Request body for creating an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedCreateItem {
    /// Rotation of the vault key the item key packet is sealed to.
    pub rotation_id: RotationId,
    /// Item private key sealed to the vault key.
    pub vault_key_packet: KeyPacket,
    /// Author address signature over the packet.
    pub vault_key_packet_signature: Signature,
    /// Encoding of `content`.
    pub content_format_version: u32,
    /// Content sealed to the item key.
    #[serde(with = "base64_bytes")]
    pub content: Vec<u8>,
    /// Author address signature over the content.
    pub user_signature: Signature,
    /// Item key signature over the content.
    pub item_key_signature: Signature,
    /// Application the item is associated with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_name: Option<String>,
}

impl EncryptedCreateItem {
    /// The content part of the request.
    pub fn encrypted_content(&self) -> EncryptedItemContent {
        EncryptedItemContent {
            content_format_version: self.content_format_version,
            content: self.content.clone(),
        }
    }
}

/// Request body for updating an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedUpdateItemRequest {
    /// Rotation of the vault key the item key packet is sealed to.
    pub rotation_id: RotationId,
    /// Item private key sealed to the vault key.
    pub vault_key_packet: KeyPacket,
    /// Author address signature over the packet.
    pub vault_key_packet_signature: Signature,
    /// Revision this update is based on.
    pub last_revision: Revision,
    /// Encoding of `content`.
    pub content_format_version: u32,
    /// Content sealed to the item key.
    #[serde(with = "base64_bytes")]
    pub content: Vec<u8>,
    /// Author address signature over the content.
    pub user_signature: Signature,
    /// Item key signature over the content.
    pub item_key_signature: Signature,
}

impl EncryptedUpdateItemRequest {
    /// The content part of the request.
    pub fn encrypted_content(&self) -> EncryptedItemContent {
        EncryptedItemContent {
            content_format_version: self.content_format_version,
            content: self.content.clone(),
        }
    }
}

/// An item as stored and returned by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredItem {
    pub item_id: ItemId,
    pub share_id: ShareId,
    pub revision: Revision,
    pub rotation_id: RotationId,
    pub vault_key_packet: KeyPacket,
    pub vault_key_packet_signature: Signature,
    pub content_format_version: u32,
    #[serde(with = "base64_bytes")]
    pub content: Vec<u8>,
    pub user_signature: Signature,
    pub item_key_signature: Signature,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_name: Option<String>,
    pub create_time: DateTime<Utc>,
    pub modify_time: DateTime<Utc>,
}

impl StoredItem {
    /// The content part of the stored item.
    pub fn encrypted_content(&self) -> EncryptedItemContent {
        EncryptedItemContent {
            content_format_version: self.content_format_version,
            content: self.content.clone(),
        }
    }
}

/// Share data as delivered to a member before verification.
///
/// The content fields are optional: a share without vault metadata carries
/// none of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedShareResponse {
    pub share_id: ShareId,
    pub vault_id: VaultId,
    /// The member's own signature accepting the grant.
    pub acceptance_signature: Signature,
    /// The inviter's signature issuing the grant.
    pub inviter_acceptance_signature: Signature,
    /// The key the inviter signed with.
    pub signing_key: PublicKey,
    /// Vault metadata sealed to the vault key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<KeyPacket>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_format_version: Option<u32>,
    /// Rotation of the vault key the content is sealed to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_rotation_id: Option<RotationId>,
    /// Address signature over the content, sealed to the vault key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_encrypted_address_signature: Option<KeyPacket>,
    /// Vault key signature over the content, sealed to the vault key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_encrypted_vault_signature: Option<KeyPacket>,
    /// Email of the address that signed the content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_signature_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_time: Option<DateTime<Utc>>,
    pub create_time: DateTime<Utc>,
}

impl EncryptedShareResponse {
    /// Whether the share carries any content field at all.
    pub fn has_content(&self) -> bool {
        self.content.is_some()
            || self.content_encrypted_address_signature.is_some()
            || self.content_encrypted_vault_signature.is_some()
    }
}

/// One member's copy of a vault key rotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedVaultKey {
    pub rotation_id: RotationId,
    /// Monotonic rotation number, 1 for the vault's first key.
    pub rotation: u64,
    /// Vault private key sealed to the member's address key.
    pub key_packet: KeyPacket,
    /// Issuer signature over the record.
    pub key_packet_signature: Signature,
    /// Whether this is the key new content should be written with.
    pub is_primary: bool,
    /// Whether the key may still be used for writing.
    pub is_active: bool,
    pub create_time: DateTime<Utc>,
}

impl EncryptedVaultKey {
    /// Canonical bytes the issuer signs.
    pub fn signed_message(&self) -> Vec<u8> {
        vault_key_record_message(&self.rotation_id, self.rotation, &self.key_packet)
    }
}

/// The item key of one rotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedItemKey {
    pub rotation_id: RotationId,
    /// Item private key sealed to the vault key of the same rotation.
    pub key_packet: KeyPacket,
    /// Vault key signature over the record.
    pub key_packet_signature: Signature,
}

impl EncryptedItemKey {
    /// Canonical bytes the vault key signs.
    pub fn signed_message(&self) -> Vec<u8> {
        item_key_packet_message(&self.rotation_id, &self.key_packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyward_crypto::{sign, KeyPair, SignatureContext};

    fn signature() -> Signature {
        sign(KeyPair::generate().private(), SignatureContext::ItemContentByUser, b"x")
    }

    fn create_request(package_name: Option<String>) -> EncryptedCreateItem {
        EncryptedCreateItem {
            rotation_id: RotationId::new("r1").unwrap(),
            vault_key_packet: KeyPacket::from_bytes(vec![1, 2, 3]),
            vault_key_packet_signature: signature(),
            content_format_version: 2,
            content: vec![4, 5, 6],
            user_signature: signature(),
            item_key_signature: signature(),
            package_name,
        }
    }

    #[test]
    fn test_create_request_field_names() {
        let json = serde_json::to_value(create_request(Some("com.example".to_string()))).unwrap();

        assert_eq!(json["rotationId"], "r1");
        assert_eq!(json["vaultKeyPacket"], "AQID");
        assert_eq!(json["contentFormatVersion"], 2);
        assert_eq!(json["content"], "BAUG");
        assert_eq!(json["packageName"], "com.example");
        assert!(json["userSignature"].is_string());
        assert!(json["itemKeySignature"].is_string());
        assert!(json["vaultKeyPacketSignature"].is_string());
    }

    #[test]
    fn test_package_name_omitted_when_absent() {
        let json = serde_json::to_value(create_request(None)).unwrap();
        assert!(json.get("packageName").is_none());
    }

    #[test]
    fn test_update_request_carries_last_revision() {
        let create = create_request(None);
        let update = EncryptedUpdateItemRequest {
            rotation_id: create.rotation_id,
            vault_key_packet: create.vault_key_packet,
            vault_key_packet_signature: create.vault_key_packet_signature,
            last_revision: Revision(7),
            content_format_version: create.content_format_version,
            content: create.content,
            user_signature: create.user_signature,
            item_key_signature: create.item_key_signature,
        };

        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["lastRevision"], 7);

        let restored: EncryptedUpdateItemRequest = serde_json::from_value(json).unwrap();
        assert_eq!(restored, update);
    }

    #[test]
    fn test_signed_message_binds_format_version() {
        let v1 = EncryptedItemContent {
            content_format_version: 1,
            content: vec![9, 9],
        };
        let v2 = EncryptedItemContent {
            content_format_version: 2,
            content: vec![9, 9],
        };

        let rotation = RotationId::new("r1").unwrap();
        assert_eq!(
            v1.signed_message(&rotation),
            vec![b'r', b'1', 0, 0, 0, 0, 1, 9, 9]
        );
        assert_ne!(v1.signed_message(&rotation), v2.signed_message(&rotation));
    }

    #[test]
    fn test_signed_message_binds_rotation() {
        let content = EncryptedItemContent {
            content_format_version: 2,
            content: vec![9, 9],
        };
        let first = RotationId::new("r1").unwrap();
        let second = RotationId::new("r2").unwrap();

        assert_ne!(content.signed_message(&first), content.signed_message(&second));
    }

    #[test]
    fn test_share_response_without_content() {
        let json = serde_json::json!({
            "shareId": "s1",
            "vaultId": "v1",
            "acceptanceSignature": serde_json::to_value(signature()).unwrap(),
            "inviterAcceptanceSignature": serde_json::to_value(signature()).unwrap(),
            "signingKey": KeyPair::generate().public().to_base64(),
            "createTime": "2026-01-01T00:00:00Z",
        });

        let share: EncryptedShareResponse = serde_json::from_value(json).unwrap();
        assert!(!share.has_content());
        assert!(share.content_rotation_id.is_none());
        assert!(share.expiration_time.is_none());
    }

    #[test]
    fn test_vault_key_message_ignores_flags() {
        let mut record = EncryptedVaultKey {
            rotation_id: RotationId::new("r1").unwrap(),
            rotation: 1,
            key_packet: KeyPacket::from_bytes(vec![1]),
            key_packet_signature: signature(),
            is_primary: true,
            is_active: true,
            create_time: Utc::now(),
        };
        let before = record.signed_message();

        record.is_primary = false;
        assert_eq!(record.signed_message(), before);

        record.rotation = 2;
        assert_ne!(record.signed_message(), before);
    }
}
