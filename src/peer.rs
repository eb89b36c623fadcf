//! Network identity tooling: generate and inspect the secp256k1
//! keypair a node dials out with.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, Subcommand};
use libp2p_identity::{Keypair, PeerId, secp256k1};
use serde::{Deserialize, Serialize};

#[derive(Args, Debug)]
pub struct PeerCommand {
    #[command(subcommand)]
    command: PeerSubcommand,
}

#[derive(Subcommand, Debug)]
enum PeerSubcommand {
    /// Generate a fresh identity and write it to a YAML file.
    Generate {
        /// Where to write the identity. The containing directory must
        /// already exist and the file must not.
        #[arg(long, short)]
        output: PathBuf,
    },
    /// Print the peer id of a previously generated identity file.
    Show {
        file: PathBuf,
    },
}

/// On-disk form of a node identity.
#[derive(Debug, Serialize, Deserialize)]
struct PeerIdentity {
    /// Hex-encoded secp256k1 secret key.
    private_key: String,
    /// Hex-encoded compressed public key.
    public_key: String,
    peer_id: String,
}

pub fn run(command: PeerCommand) -> Result<()> {
    match command.command {
        PeerSubcommand::Generate { output } => {
            let peer_id = generate(&output)?;
            println!("Generated identity {peer_id} at {}", output.display());
            Ok(())
        }
        PeerSubcommand::Show { file } => {
            let keypair = load_keypair(&file)?;
            println!("{}", PeerId::from(keypair.public()));
            Ok(())
        }
    }
}

/// Create a new identity file at `output` and return its peer id.
pub fn generate(output: &Path) -> Result<PeerId> {
    if output.exists() {
        bail!("Not overwriting existing file {}", output.display());
    }

    let parent = match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    if !parent.is_dir() {
        bail!(
            "Path {} must point into an existing directory",
            output.display()
        );
    }

    let keypair = secp256k1::Keypair::generate();
    let peer_id = PeerId::from(Keypair::from(keypair.clone()).public());

    let identity = PeerIdentity {
        private_key: hex::encode(keypair.secret().to_bytes()),
        public_key: hex::encode(keypair.public().to_bytes()),
        peer_id: peer_id.to_string(),
    };

    let yaml = serde_yaml::to_string(&identity)?;
    fs::write(output, yaml)
        .with_context(|| format!("failed to write identity to {}", output.display()))?;

    Ok(peer_id)
}

/// Load the keypair stored by [`generate`].
pub fn load_keypair(file: &Path) -> Result<Keypair> {
    let yaml = fs::read_to_string(file)
        .with_context(|| format!("failed to read identity file {}", file.display()))?;
    let identity: PeerIdentity =
        serde_yaml::from_str(&yaml).context("identity file is not valid YAML")?;

    let mut secret_bytes = hex::decode(identity.private_key.trim_start_matches("0x"))
        .context("private key is not valid hex")?;
    let secret = secp256k1::SecretKey::try_from_bytes(&mut secret_bytes)
        .context("private key is not a valid secp256k1 scalar")?;

    Ok(Keypair::from(secp256k1::Keypair::from(secret)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_then_load_round_trips_the_peer_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.yaml");

        let peer_id = generate(&path).unwrap();
        let keypair = load_keypair(&path).unwrap();

        assert_eq!(PeerId::from(keypair.public()), peer_id);
    }

    #[test]
    fn generate_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.yaml");
        generate(&path).unwrap();

        let err = generate(&path).unwrap_err();

        assert!(err.to_string().contains("Not overwriting existing file"));
    }

    #[test]
    fn generate_requires_an_existing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing-subdir").join("identity.yaml");

        let err = generate(&path).unwrap_err();

        assert!(err.to_string().contains("existing directory"));
    }

    #[test]
    fn show_rejects_garbage_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.yaml");
        fs::write(&path, "private_key: zz\npublic_key: aa\npeer_id: x\n").unwrap();

        assert!(load_keypair(&path).is_err());
    }
}
