//! Keyward CLI - Command line driver for the vault content protocol.
//!
//! Every command runs the full protocol against an in-memory server: keys
//! are issued and resolved, content is sealed and signed, and everything
//! read back is verified before it is used.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use keyward_common::{AddressId, Error, ShareId, VaultId};
use keyward_crypto::{CryptoProvider, DefaultCryptoProvider, KdfParams, KeyPair, LockedPrivateKey};
use keyward_remote::{ItemTransport, MemoryKeyStore, MemoryServer};
use keyward_vault::{
    ItemContent, ItemRequestBuilder, KeyResolver, KeyRotation, LoginContent, MemoryShareStore,
    ResolverConfig, RotationBundle, ShareContentInput, ShareIngestor, ShareIssuer,
    ShareVerificationKeys, UserAddress, VaultMember,
};

#[derive(Parser)]
#[command(name = "keyward")]
#[command(about = "Keyward - Vault content protocol driver")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a login item, then read it back and verify it.
    Item {
        /// Login username.
        #[arg(short, long)]
        username: String,

        /// Login password.
        #[arg(short, long)]
        password: String,

        /// Item title.
        #[arg(short, long, default_value = "Example")]
        title: String,

        /// Passphrase protecting the address key.
        #[arg(long, default_value = "correct horse battery staple")]
        passphrase: String,

        /// KDF strength: "interactive", "moderate", or "sensitive".
        #[arg(short, long, default_value = "interactive")]
        strength: String,
    },

    /// Issue a share to a second address and ingest it.
    Share {
        /// Flip one byte of the vault signature before ingesting.
        #[arg(long)]
        tamper: bool,
    },

    /// Rotate the vault key and check that older items still open.
    Rotate {
        /// Number of rotations to issue.
        #[arg(short, long, default_value_t = 2)]
        count: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Item {
            username,
            password,
            title,
            passphrase,
            strength,
        } => cmd_item(&username, &password, &title, &passphrase, &strength).await,

        Commands::Share { tamper } => cmd_share(tamper).await,

        Commands::Rotate { count } => cmd_rotate(count).await,
    }
}

/// One address with a freshly created vault published on an in-memory server.
struct Session {
    crypto: Arc<dyn CryptoProvider>,
    server: Arc<MemoryServer>,
    resolver: KeyResolver,
    owner: UserAddress,
    share_id: ShareId,
    bundle: RotationBundle,
}

impl Session {
    async fn start(owner: UserAddress) -> Result<Self> {
        let crypto: Arc<dyn CryptoProvider> = Arc::new(DefaultCryptoProvider);
        let server = Arc::new(MemoryServer::new());
        let share_id = ShareId::new("share-1").context("Invalid share id")?;

        let bundle = KeyRotation::new(crypto.clone())
            .create_vault(&owner, &[VaultMember::from(&owner)])
            .context("Failed to create vault keys")?;
        server
            .publish_rotation(
                &share_id,
                bundle.vault_key_records.clone(),
                bundle.item_key_record.clone(),
            )
            .await;

        let resolver = KeyResolver::new(
            crypto.clone(),
            server.clone(),
            Arc::new(MemoryKeyStore::new()),
            ResolverConfig::default(),
        );

        Ok(Self {
            crypto,
            server,
            resolver,
            owner,
            share_id,
            bundle,
        })
    }
}

fn address(id: &str) -> Result<UserAddress> {
    let address_id = AddressId::new(id).context("Invalid address id")?;
    Ok(UserAddress::new(
        address_id,
        format!("{}@example.com", id),
        KeyPair::generate(),
    ))
}

/// Create, store and read back one login item.
async fn cmd_item(
    username: &str,
    password: &str,
    title: &str,
    passphrase: &str,
    strength: &str,
) -> Result<()> {
    let kdf_params = match strength {
        "interactive" => KdfParams::interactive(),
        "moderate" => KdfParams::moderate(),
        "sensitive" => KdfParams::sensitive(),
        _ => {
            anyhow::bail!("Invalid strength. Use: interactive, moderate, or sensitive");
        }
    };

    if passphrase.is_empty() {
        anyhow::bail!("Passphrase cannot be empty");
    }

    let pair = KeyPair::generate();
    let locked = LockedPrivateKey::lock(pair.private(), passphrase.as_bytes(), kdf_params)
        .context("Failed to lock address key")?;
    let owner = UserAddress::unlock(
        AddressId::new("alice").context("Invalid address id")?,
        "alice@example.com",
        &locked,
        passphrase.as_bytes(),
    )
    .context("Failed to unlock address key")?;
    info!("Unlocked address key");

    let session = Session::start(owner).await?;
    let builder = ItemRequestBuilder::new(session.crypto.clone());
    let signer = *session.owner.public_key();

    let (vault_key, item_key) = session
        .resolver
        .get_latest_vault_item_key(&session.owner, &session.share_id, &signer)
        .await
        .context("Failed to resolve vault keys")?;

    let content: ItemContent = LoginContent::new(username, password)
        .with_title(title)
        .into();
    let request = builder
        .create(&vault_key, &item_key, &session.owner, &content, None)
        .context("Failed to build create request")?;
    let stored = session
        .server
        .create_item(&session.share_id, request)
        .await
        .context("Failed to create item")?;

    let item_key = session
        .resolver
        .get_item_key_by_id(&session.owner, &session.share_id, &signer, &stored.rotation_id)
        .await
        .context("Failed to resolve item key")?;
    let (verified, opened) = builder
        .open_item(&stored, &vault_key, &item_key, &[signer])
        .context("Failed to open item")?;

    println!("Item created and verified!");
    println!("  ID: {}", verified.item_id());
    println!("  Kind: {}", opened.kind());
    println!("  Title: {}", opened.title().unwrap_or_default());
    println!("  Revision: {}", verified.revision().0);
    println!("  Rotation: {}", verified.rotation_id());
    println!("  Content matches: {}", opened == content);

    Ok(())
}

/// Issue a share from the vault owner to a second address.
async fn cmd_share(tamper: bool) -> Result<()> {
    let alice = address("alice")?;
    let bob = address("bob")?;
    let crypto: Arc<dyn CryptoProvider> = Arc::new(DefaultCryptoProvider);

    let bundle = KeyRotation::new(crypto.clone())
        .create_vault(&alice, &[VaultMember::from(&alice), VaultMember::from(&bob)])
        .context("Failed to create vault keys")?;

    let mut response = ShareIssuer::new(crypto.clone())
        .issue(
            &ShareId::new("share-1").context("Invalid share id")?,
            &VaultId::new("vault-1").context("Invalid vault id")?,
            &alice,
            &bob,
            Some(ShareContentInput {
                vault_key: &bundle.vault_key,
                content: b"Family vault",
            }),
        )
        .context("Failed to issue share")?;

    if tamper {
        if let Some(packet) = response.content_encrypted_vault_signature.as_mut() {
            if let Some(byte) = packet.as_mut_bytes().last_mut() {
                *byte ^= 0x01;
            }
        }
        info!("Tampered with the vault signature");
    }

    let keys = ShareVerificationKeys {
        address_keys: vec![*bob.public_key()],
        inviter_keys: vec![*alice.public_key()],
        content_signature_keys: vec![*alice.public_key()],
        vault_keys: vec![bundle.vault_key.clone()],
    };
    let store = Arc::new(MemoryShareStore::new());
    let ingestor = ShareIngestor::new(crypto, store.clone());

    match ingestor.ingest(&response, &keys).await {
        Ok(share) => {
            let content = ingestor
                .verifier()
                .open_content(&share)
                .context("Failed to open share content")?;
            println!("Share accepted!");
            println!("  Share: {}", share.share_id());
            println!("  Vault: {}", share.vault_id());
            if let Some(content) = content {
                println!("  Content: {}", String::from_utf8_lossy(content.as_bytes()));
            }
        }
        Err(Error::InvalidSignature(failure)) => {
            println!("Share rejected: {}", failure);
        }
        Err(e) => return Err(e).context("Failed to ingest share"),
    }
    println!("  Stored shares: {}", store.len().await);

    Ok(())
}

/// Rotate the vault key and read back the first item.
async fn cmd_rotate(count: u32) -> Result<()> {
    let mut session = Session::start(address("alice")?).await?;
    let builder = ItemRequestBuilder::new(session.crypto.clone());
    let signer = *session.owner.public_key();
    let rotation = KeyRotation::new(session.crypto.clone());

    let content: ItemContent = LoginContent::new("alice", "s3cr3t").with_title("Example").into();
    let request = builder
        .create(
            &session.bundle.vault_key,
            &session.bundle.item_key,
            &session.owner,
            &content,
            None,
        )
        .context("Failed to build create request")?;
    let first = session
        .server
        .create_item(&session.share_id, request)
        .await
        .context("Failed to create item")?;

    for _ in 0..count {
        let next = rotation
            .rotate(
                &session.bundle.vault_key,
                &session.owner,
                &[VaultMember::from(&session.owner)],
            )
            .context("Failed to rotate vault key")?;
        session
            .server
            .publish_rotation(
                &session.share_id,
                next.vault_key_records.clone(),
                next.item_key_record.clone(),
            )
            .await;
        session.bundle = next;
    }

    let latest = session
        .resolver
        .get_latest_vault_key(&session.owner, &session.share_id, &signer)
        .await
        .context("Failed to resolve latest vault key")?;
    let vault_key = session
        .resolver
        .get_vault_key_by_id(&session.owner, &session.share_id, &signer, &first.rotation_id)
        .await
        .context("Failed to resolve original vault key")?;
    let item_key = session
        .resolver
        .get_item_key_by_id(&session.owner, &session.share_id, &signer, &first.rotation_id)
        .await
        .context("Failed to resolve original item key")?;
    let (_, opened) = builder
        .open_item(&first, &vault_key, &item_key, &[signer])
        .context("Failed to open original item")?;

    println!("Rotated {} time(s)", count);
    println!("  Latest rotation: {} ({})", latest.rotation, latest.rotation_id);
    println!("  Original rotation: {} ({})", vault_key.rotation, vault_key.rotation_id);
    println!("  Original item still opens: {}", opened == content);

    Ok(())
}
