// Offline transaction construction and signing
//
// Builds a v1 transaction envelope (optionally wrapped in a fee bump), signs
// it over `sha256(network_id ‖ envelope type ‖ tx)` and returns the base64
// XDR ready for submission together with its hash.

use base64::Engine;
use sha2::{Digest, Sha256};
use stellar_xdr::curr::{
    Asset, ClaimClaimableBalanceOp, ClaimableBalanceId, DecoratedSignature, FeeBumpTransaction,
    FeeBumpTransactionEnvelope, FeeBumpTransactionExt, FeeBumpTransactionInnerTx, Hash, Limits,
    Memo, MuxedAccount, Operation, OperationBody, PaymentOp, Preconditions, SequenceNumber,
    Signature, SignatureHint, TimeBounds, TimePoint, Transaction, TransactionEnvelope,
    TransactionExt, TransactionSignaturePayload, TransactionSignaturePayloadTaggedTransaction,
    TransactionV1Envelope, Uint256, WriteXdr,
};

use crate::error::ExecutionError;
use crate::execution::keys::Keypair;

/// Protocol limit on operations per transaction
pub const MAX_OPERATIONS: usize = 100;

/// Text memos are limited in bytes, not characters
pub const MAX_MEMO_BYTES: usize = 28;

/// An operation to include, in decoded form
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannedOp {
    Payment { destination: [u8; 32], amount: i64 },
    Claim { balance_id: [u8; 32] },
}

#[derive(Debug, Clone)]
pub struct TxOptions {
    pub network_passphrase: String,
    /// Fee per operation, in stroops
    pub per_operation_fee: u32,
    /// Upper time bound, unix seconds; 0 for none
    pub max_time: u64,
    pub memo: Option<String>,
}

/// A signed envelope ready for submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    /// Hex hash of the outermost transaction (the fee bump when present)
    pub hash: String,
    pub envelope_xdr: String,
    /// Account sequence the transaction was built on (it uses this + 1)
    pub source_sequence: i64,
    pub fee_bumped: bool,
}

/// Horizon writes balance ids as 8 hex chars of type discriminant followed
/// by the 32-byte hash; the bare 64-char hash is accepted too.
pub fn parse_balance_id(id: &str) -> Result<[u8; 32], ExecutionError> {
    let invalid = || ExecutionError::InvalidBalanceId(id.to_string());

    let hash_hex = match id.len() {
        72 if id.starts_with("00000000") => &id[8..],
        64 => id,
        _ => return Err(invalid()),
    };

    let bytes = hex::decode(hash_hex).map_err(|_| invalid())?;
    bytes.try_into().map_err(|_| invalid())
}

pub fn format_balance_id(hash: &[u8; 32]) -> String {
    format!("00000000{}", hex::encode(hash))
}

pub fn network_id(passphrase: &str) -> [u8; 32] {
    Sha256::digest(passphrase.as_bytes()).into()
}

fn xdr_error(e: stellar_xdr::curr::Error) -> ExecutionError {
    ExecutionError::Xdr(e.to_string())
}

fn muxed(key: [u8; 32]) -> MuxedAccount {
    MuxedAccount::Ed25519(Uint256(key))
}

fn payload_hash(
    network: [u8; 32],
    tagged: TransactionSignaturePayloadTaggedTransaction,
) -> Result<[u8; 32], ExecutionError> {
    let payload = TransactionSignaturePayload {
        network_id: Hash(network),
        tagged_transaction: tagged,
    };
    let bytes = payload.to_xdr(Limits::none()).map_err(xdr_error)?;
    Ok(Sha256::digest(&bytes).into())
}

fn decorated(signer: &Keypair, hash: &[u8; 32]) -> Result<DecoratedSignature, ExecutionError> {
    let signature = signer.sign(hash);
    Ok(DecoratedSignature {
        hint: SignatureHint(signer.hint()),
        signature: Signature(signature.to_vec().try_into().map_err(xdr_error)?),
    })
}

fn to_operation(op: &PlannedOp) -> Operation {
    let body = match op {
        PlannedOp::Payment {
            destination,
            amount,
        } => OperationBody::Payment(PaymentOp {
            destination: muxed(*destination),
            asset: Asset::Native,
            amount: *amount,
        }),
        PlannedOp::Claim { balance_id } => {
            OperationBody::ClaimClaimableBalance(ClaimClaimableBalanceOp {
                balance_id: ClaimableBalanceId::ClaimableBalanceIdTypeV0(Hash(*balance_id)),
            })
        }
    };

    Operation {
        source_account: None,
        body,
    }
}

/// Build and sign a transaction for `source` on top of `account_sequence`.
///
/// With a `fee_payer` the signed transaction is wrapped in a fee bump signed
/// by the payer, whose fee covers every inner operation plus the bump itself.
pub fn build_signed(
    source: &Keypair,
    account_sequence: i64,
    ops: &[PlannedOp],
    options: &TxOptions,
    fee_payer: Option<&Keypair>,
) -> Result<SignedTransaction, ExecutionError> {
    if ops.is_empty() || ops.len() > MAX_OPERATIONS {
        return Err(ExecutionError::Xdr(format!(
            "operation count {} outside 1..={}",
            ops.len(),
            MAX_OPERATIONS
        )));
    }

    let seq_num = account_sequence
        .checked_add(1)
        .ok_or(ExecutionError::SequenceOverflow)?;

    let memo = match &options.memo {
        Some(text) => Memo::Text(text.as_bytes().to_vec().try_into().map_err(xdr_error)?),
        None => Memo::None,
    };

    let inner_fee = options
        .per_operation_fee
        .checked_mul(ops.len() as u32)
        .ok_or_else(|| ExecutionError::Xdr("fee overflow".to_string()))?;

    let operations: Vec<Operation> = ops.iter().map(to_operation).collect();

    let tx = Transaction {
        source_account: muxed(source.public_key()),
        fee: inner_fee,
        seq_num: SequenceNumber(seq_num),
        cond: Preconditions::Time(TimeBounds {
            min_time: TimePoint(0),
            max_time: TimePoint(options.max_time),
        }),
        memo,
        operations: operations.try_into().map_err(xdr_error)?,
        ext: TransactionExt::V0,
    };

    let network = network_id(&options.network_passphrase);
    let tx_hash = payload_hash(
        network,
        TransactionSignaturePayloadTaggedTransaction::Tx(tx.clone()),
    )?;

    let inner = TransactionV1Envelope {
        tx,
        signatures: vec![decorated(source, &tx_hash)?]
            .try_into()
            .map_err(xdr_error)?,
    };

    let (envelope, hash) = match fee_payer {
        None => (TransactionEnvelope::Tx(inner), tx_hash),
        Some(payer) => {
            let bump_fee = options.per_operation_fee as i64 * (ops.len() as i64 + 1);
            let bump = FeeBumpTransaction {
                fee_source: muxed(payer.public_key()),
                fee: bump_fee,
                inner_tx: FeeBumpTransactionInnerTx::Tx(inner),
                ext: FeeBumpTransactionExt::V0,
            };
            let bump_hash = payload_hash(
                network,
                TransactionSignaturePayloadTaggedTransaction::TxFeeBump(bump.clone()),
            )?;
            let envelope = TransactionEnvelope::TxFeeBump(FeeBumpTransactionEnvelope {
                tx: bump,
                signatures: vec![decorated(payer, &bump_hash)?]
                    .try_into()
                    .map_err(xdr_error)?,
            });
            (envelope, bump_hash)
        }
    };

    let xdr_bytes = envelope.to_xdr(Limits::none()).map_err(xdr_error)?;

    Ok(SignedTransaction {
        hash: hex::encode(hash),
        envelope_xdr: base64::engine::general_purpose::STANDARD.encode(xdr_bytes),
        source_sequence: account_sequence,
        fee_bumped: fee_payer.is_some(),
    })
}

/// Recompute the hash of a base64 envelope, as Horizon reports it
#[cfg(test)]
pub fn envelope_hash(envelope_xdr: &str, network_passphrase: &str) -> Result<String, ExecutionError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(envelope_xdr)
        .map_err(|e| ExecutionError::Xdr(e.to_string()))?;
    use stellar_xdr::curr::ReadXdr;

    let envelope = TransactionEnvelope::from_xdr(bytes, Limits::none()).map_err(xdr_error)?;

    let tagged = match envelope {
        TransactionEnvelope::Tx(v1) => TransactionSignaturePayloadTaggedTransaction::Tx(v1.tx),
        TransactionEnvelope::TxFeeBump(bump) => {
            TransactionSignaturePayloadTaggedTransaction::TxFeeBump(bump.tx)
        }
        TransactionEnvelope::TxV0(_) => {
            return Err(ExecutionError::Xdr("v0 envelopes are not supported".to_string()))
        }
    };

    Ok(hex::encode(payload_hash(network_id(network_passphrase), tagged)?))
}
