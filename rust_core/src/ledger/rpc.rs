//! JSON-RPC ledger client.

use super::{LedgerError, LedgerReader, LedgerWriter};
use async_trait::async_trait;
use solana_client::client_error::{ClientError, ClientErrorKind};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_request::{RpcError, RpcResponseErrorData};
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::instruction::Instruction;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Signature, Signer};
use solana_sdk::transaction::Transaction;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct RpcLedger {
    client: Arc<RpcClient>,
    commitment: CommitmentConfig,
}

impl std::fmt::Debug for RpcLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcLedger")
            .field("url", &self.client.url())
            .field("commitment", &self.commitment.commitment)
            .finish()
    }
}

impl RpcLedger {
    pub fn new(rpc_url: &str) -> Self {
        Self::with_commitment(rpc_url, CommitmentConfig::confirmed())
    }

    pub fn with_commitment(rpc_url: &str, commitment: CommitmentConfig) -> Self {
        Self {
            client: Arc::new(RpcClient::new_with_commitment(rpc_url.to_string(), commitment)),
            commitment,
        }
    }
}

/// Preflight failures carry the program logs; everything else is transport.
fn classify(err: ClientError) -> LedgerError {
    let logs = match err.kind() {
        ClientErrorKind::RpcError(RpcError::RpcResponseError {
            data: RpcResponseErrorData::SendTransactionPreflightFailure(simulation),
            ..
        }) => Some(simulation.logs.clone().unwrap_or_default()),
        ClientErrorKind::RpcError(RpcError::RpcResponseError { .. })
        | ClientErrorKind::TransactionError(_) => Some(Vec::new()),
        _ => None,
    };

    match logs {
        Some(logs) => LedgerError::Rejected {
            message: err.to_string(),
            logs,
        },
        None => LedgerError::Rpc(err.to_string()),
    }
}

#[async_trait]
impl LedgerReader for RpcLedger {
    async fn fetch_account_data(&self, address: &Pubkey) -> Result<Option<Vec<u8>>, LedgerError> {
        let response = self
            .client
            .get_account_with_commitment(address, self.commitment)
            .await
            .map_err(|e| LedgerError::Rpc(e.to_string()))?;

        Ok(response.value.map(|account| account.data))
    }
}

#[async_trait]
impl LedgerWriter for RpcLedger {
    async fn submit(
        &self,
        instructions: &[Instruction],
        signer: &(dyn Signer + Send + Sync),
    ) -> Result<Signature, LedgerError> {
        let payer = signer.pubkey();
        let blockhash = self
            .client
            .get_latest_blockhash()
            .await
            .map_err(|e| LedgerError::Rpc(e.to_string()))?;

        let transaction = {
            let mut tx = Transaction::new_with_payer(instructions, Some(&payer));
            let signers: [&dyn Signer; 1] = [signer];
            tx.try_sign(&signers[..], blockhash)
                .map_err(|e| LedgerError::Signing(e.to_string()))?;
            tx
        };

        debug!(
            "Submitting transaction with {} instructions for {}",
            instructions.len(),
            payer
        );

        match self.client.send_and_confirm_transaction(&transaction).await {
            Ok(signature) => {
                info!("Transaction confirmed: {}", signature);
                Ok(signature)
            }
            Err(e) => {
                let err = classify(e);
                warn!("Transaction failed: {}", err);
                Err(err)
            }
        }
    }
}
