//! # Satlock CLI
//!
//! Command-line front end for the escrow core: create script-locked
//! escrows, record funding, track lifecycle status against the chain
//! indexer, and drive the unlock flow with externally collected
//! signatures.

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use satlock::escrow::{FeePolicy, Party};
use satlock::services::EscrowStore;
use satlock::{config, EscrowService, EsploraClient, JsonFileStore};

#[derive(Parser)]
#[command(name = "satlock")]
#[command(about = "Script-locked two-party Bitcoin escrow")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a timelock escrow unlockable by one key after a height
    CreateTimelock {
        /// Escrow amount in satoshis
        #[arg(long)]
        amount: u64,
        /// Block height at which the funds unlock
        #[arg(long)]
        unlock_height: u32,
        /// Hex-encoded public key of the owner
        #[arg(long)]
        owner_pubkey: String,
        /// Address the redeemed funds go to
        #[arg(long)]
        receiver: String,
    },
    /// Create a 2-of-2 dual-approval escrow
    CreateDual {
        /// Escrow amount in satoshis
        #[arg(long)]
        amount: u64,
        /// Hex-encoded public key of the first party
        #[arg(long)]
        pubkey_a: String,
        /// Hex-encoded public key of the second party
        #[arg(long)]
        pubkey_b: String,
        /// Address the redeemed funds go to
        #[arg(long)]
        receiver: String,
        /// Buyer's own address (informational)
        #[arg(long)]
        buyer: String,
        /// Seller's own address (informational)
        #[arg(long)]
        seller: String,
    },
    /// List all known escrows
    List,
    /// Run one poll cycle for an escrow and print its status
    Status {
        /// Escrow id
        id: String,
    },
    /// Record the funding transaction broadcast for an escrow
    Fund {
        /// Escrow id
        id: String,
        /// Funding transaction id
        txid: String,
    },
    /// Record a party's sign-off on a dual-approval escrow
    Sign {
        /// Escrow id
        id: String,
        /// Which party signed: buyer or seller
        party: String,
    },
    /// Finalize and broadcast the unlock transaction
    Unlock {
        /// Escrow id
        id: String,
        /// Fee rate in sat/vB (mutually exclusive with --fee)
        #[arg(long)]
        fee_rate: Option<u64>,
        /// Fixed fee in satoshis
        #[arg(long)]
        fee: Option<u64>,
        /// Signature as <pubkey_hex>:<signature_hex>; repeat for each signer
        #[arg(long = "sig")]
        signatures: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let network = config::configured_network()?;
    let chain = EsploraClient::from_env()?;
    let store = JsonFileStore::new(config::configured_store_path());
    let service = EscrowService::new(chain, store, network);

    match cli.command {
        Commands::CreateTimelock {
            amount,
            unlock_height,
            owner_pubkey,
            receiver,
        } => {
            let record = service.create_timelock(unlock_height, owner_pubkey, receiver, amount)?;
            println!("Created escrow {}", record.id);
            println!("  Fund {} sats to: {}", record.amount_sats, record.escrow_address);
            println!("  Unlocks at height {unlock_height}");
        }
        Commands::CreateDual {
            amount,
            pubkey_a,
            pubkey_b,
            receiver,
            buyer,
            seller,
        } => {
            let record =
                service.create_dual_approval(pubkey_a, pubkey_b, receiver, buyer, seller, amount)?;
            println!("Created escrow {}", record.id);
            println!("  Fund {} sats to: {}", record.amount_sats, record.escrow_address);
            println!("  Unlocks once both parties sign off");
        }
        Commands::List => {
            let mut records = service.store().list()?;
            records.sort_by_key(|r| r.created_at);
            for record in records {
                println!(
                    "{}  {}  {:>12} sats  {}",
                    record.id, record.status, record.amount_sats, record.escrow_address
                );
            }
        }
        Commands::Status { id } => {
            let record = service.poll_once(&id).await?;
            println!("Escrow {}", record.id);
            println!("  Status:  {}", record.status);
            println!("  Address: {}", record.escrow_address);
            println!("  Amount:  {} sats", record.amount_sats);
            if let Some(txid) = &record.funding_txid {
                println!("  Funding: {txid}");
            }
            if let Some(txid) = &record.redeem_txid {
                println!("  Redeem:  {txid}");
            }
        }
        Commands::Fund { id, txid } => {
            let record = service.record_funding(&id, &txid)?;
            println!("Recorded funding {} for escrow {}", txid, record.id);
        }
        Commands::Sign { id, party } => {
            let party = match party.to_ascii_lowercase().as_str() {
                "buyer" => Party::Buyer,
                "seller" => Party::Seller,
                other => return Err(anyhow!("unknown party '{other}', expected buyer or seller")),
            };
            let record = service.mark_signed(&id, party)?;
            println!(
                "Escrow {}: buyer_signed={} seller_signed={}",
                record.id, record.counterparties.buyer_signed, record.counterparties.seller_signed
            );
        }
        Commands::Unlock {
            id,
            fee_rate,
            fee,
            signatures,
        } => {
            let policy = match (fee, fee_rate) {
                (Some(sats), None) => FeePolicy::Fixed(sats),
                (None, Some(rate)) => FeePolicy::Rate(rate),
                (None, None) => FeePolicy::Rate(config::escrow::DEFAULT_FEE_RATE),
                (Some(_), Some(_)) => return Err(anyhow!("--fee and --fee-rate are exclusive")),
            };

            let signatures = signatures
                .iter()
                .map(|entry| {
                    let (pubkey, sig) = entry
                        .split_once(':')
                        .ok_or_else(|| anyhow!("expected <pubkey_hex>:<signature_hex>"))?;
                    Ok((pubkey.to_string(), hex::decode(sig)?))
                })
                .collect::<Result<Vec<_>>>()?;

            let record = service
                .unlock_with_signatures(&id, &signatures, policy)
                .await?;
            println!("Escrow {} released", record.id);
            if let Some(txid) = &record.redeem_txid {
                println!("  Redeem txid: {txid}");
            }
        }
    }

    Ok(())
}
