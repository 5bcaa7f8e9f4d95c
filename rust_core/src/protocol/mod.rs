//! Protocol client: assembles complete, submittable operations for every
//! user-facing exchange action and submits them.
//!
//! Building an operation walks a fixed lifecycle:
//!
//! ```text
//! Unvalidated -> AccountsDerived -> DependencyChecked -> Assembled -> Submitted -> Confirmed
//!                                                                              \-> Rejected
//! ```
//!
//! Every assembled operation starts with a compute-budget instruction. A
//! missing token account the action depends on is created by an extra
//! instruction placed right before the program instruction. Builders never
//! drop an account silently; unmet preconditions surface as typed errors.
//! Submissions are not retried and ledger rejections are returned verbatim.

pub mod instructions;

use crate::config::CoreConfig;
use crate::derivation::{AddressDeriver, DerivationError, MarketId};
use crate::ledger::{
    BondingCurveAccount, CodecError, LedgerError, LedgerReader, LedgerWriter, MarketAccount,
    ProtocolConfigAccount,
};
use crate::models::{
    BusinessMetadata, DerivedBusinessRow, RowStatus, Sector, Takeover, DEFAULT_TOTAL_SUPPLY,
    INITIAL_PRICE, LAUNCHED_REGION,
};
use crate::pricing;
use instructions::{LaunchAccounts, SwapAccounts};
use parking_lot::RwLock;
use solana_sdk::instruction::Instruction;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Signature, Signer};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use instructions::COMPUTE_UNIT_LIMIT;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("precondition unmet: {0}")]
    PreconditionUnmet(String),

    #[error("address derivation failed: {0}")]
    Derivation(#[from] DerivationError),

    #[error("{account} account not found at {address}")]
    AccountNotFound {
        account: &'static str,
        address: Pubkey,
    },

    /// The ledger refused the transaction; message and logs as returned
    #[error("submission rejected: {message}")]
    SubmissionRejected { message: String, logs: Vec<String> },

    #[error("ledger unavailable: {0}")]
    Ledger(String),

    #[error("instruction encoding failed: {0}")]
    Encoding(String),

    #[error("account decode failed: {0}")]
    Decode(#[from] CodecError),

    #[error("invalid operation transition {from} -> {to}")]
    InvalidTransition {
        from: OperationState,
        to: OperationState,
    },
}

impl From<LedgerError> for ProtocolError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::Rejected { message, logs } => {
                ProtocolError::SubmissionRejected { message, logs }
            }
            other => ProtocolError::Ledger(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    InitializeConfig,
    CreateBusiness,
    Swap,
    InitiateTakeover,
    Sabotage,
    CreateMarket,
    ResolveMarket,
    PlaceBet,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::InitializeConfig => "initialize_config",
            Action::CreateBusiness => "create_business",
            Action::Swap => "swap",
            Action::InitiateTakeover => "initiate_takeover",
            Action::Sabotage => "sabotage",
            Action::CreateMarket => "create_market",
            Action::ResolveMarket => "resolve_market",
            Action::PlaceBet => "place_bet",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationState {
    Unvalidated,
    AccountsDerived,
    DependencyChecked,
    Assembled,
    Submitted,
    Confirmed,
    Rejected,
}

impl OperationState {
    pub fn can_transition_to(self, next: OperationState) -> bool {
        use OperationState::*;
        matches!(
            (self, next),
            (Unvalidated, AccountsDerived)
                | (AccountsDerived, DependencyChecked)
                | (DependencyChecked, Assembled)
                | (Assembled, Submitted)
                | (Submitted, Confirmed)
                | (Submitted, Rejected)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OperationState::Confirmed | OperationState::Rejected)
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One user action on its way to the ledger
#[derive(Debug, Clone)]
pub struct PendingOperation {
    pub id: Uuid,
    pub action: Action,
    payer: Pubkey,
    state: OperationState,
    instructions: Vec<Instruction>,
    touched: BTreeSet<Pubkey>,
    created_accounts: Vec<Pubkey>,
    speculative_row: Option<DerivedBusinessRow>,
}

impl PendingOperation {
    fn new(action: Action, payer: Pubkey) -> Self {
        Self {
            id: Uuid::new_v4(),
            action,
            payer,
            state: OperationState::Unvalidated,
            instructions: Vec::new(),
            touched: BTreeSet::new(),
            created_accounts: Vec::new(),
            speculative_row: None,
        }
    }

    pub fn advance(&mut self, next: OperationState) -> Result<(), ProtocolError> {
        if !self.state.can_transition_to(next) {
            return Err(ProtocolError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        debug!(operation_id = %self.id, action = %self.action, "{} -> {}", self.state, next);
        self.state = next;
        Ok(())
    }

    /// Compute budget first, then account creation, then the program instruction
    fn assemble(
        &mut self,
        compute_unit_limit: u32,
        mut prerequisites: Vec<Instruction>,
        primary: Instruction,
    ) -> Result<(), ProtocolError> {
        let mut instructions = Vec::with_capacity(prerequisites.len() + 2);
        instructions.push(instructions::compute_budget(compute_unit_limit));
        instructions.append(&mut prerequisites);
        instructions.push(primary);

        self.touched = instructions
            .iter()
            .flat_map(|ix| {
                std::iter::once(ix.program_id).chain(ix.accounts.iter().map(|meta| meta.pubkey))
            })
            .collect();
        self.instructions = instructions;
        self.advance(OperationState::Assembled)
    }

    pub fn state(&self) -> OperationState {
        self.state
    }

    pub fn payer(&self) -> &Pubkey {
        &self.payer
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Every account and program the operation references
    pub fn touched_accounts(&self) -> &BTreeSet<Pubkey> {
        &self.touched
    }

    /// Token accounts this operation creates before the program instruction
    pub fn created_accounts(&self) -> &[Pubkey] {
        &self.created_accounts
    }

    /// Optimistic row for a business launch, to show until the ledger confirms it
    pub fn speculative_row(&self) -> Option<&DerivedBusinessRow> {
        self.speculative_row.as_ref()
    }
}

#[derive(Debug)]
pub enum OperationOutcome {
    Confirmed {
        operation_id: Uuid,
        action: Action,
        signature: Signature,
    },
    Rejected {
        operation_id: Uuid,
        action: Action,
        error: ProtocolError,
    },
}

impl OperationOutcome {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, OperationOutcome::Confirmed { .. })
    }

    pub fn operation_id(&self) -> Uuid {
        match self {
            OperationOutcome::Confirmed { operation_id, .. }
            | OperationOutcome::Rejected { operation_id, .. } => *operation_id,
        }
    }
}

/// Business launch parameters
#[derive(Debug, Clone)]
pub struct CreateBusinessRequest {
    pub ticker: String,
    pub name: String,
    pub description: String,
    pub sector: Sector,
}

fn require(condition: bool, message: impl Into<String>) -> Result<(), ProtocolError> {
    if condition {
        Ok(())
    } else {
        Err(ProtocolError::PreconditionUnmet(message.into()))
    }
}

pub type SharedSigner = Arc<dyn Signer + Send + Sync>;

pub struct ProtocolClient {
    deriver: AddressDeriver,
    reader: Arc<dyn LedgerReader>,
    writer: Arc<dyn LedgerWriter>,
    identity: RwLock<Option<SharedSigner>>,
    compute_unit_limit: u32,
}

impl ProtocolClient {
    pub fn new(
        deriver: AddressDeriver,
        reader: Arc<dyn LedgerReader>,
        writer: Arc<dyn LedgerWriter>,
    ) -> Self {
        Self {
            deriver,
            reader,
            writer,
            identity: RwLock::new(None),
            compute_unit_limit: COMPUTE_UNIT_LIMIT,
        }
    }

    pub fn from_config(
        config: &CoreConfig,
        reader: Arc<dyn LedgerReader>,
        writer: Arc<dyn LedgerWriter>,
    ) -> Self {
        Self::new(AddressDeriver::new(config.program_id), reader, writer)
            .with_compute_unit_limit(config.compute_unit_limit)
    }

    pub fn with_compute_unit_limit(mut self, units: u32) -> Self {
        self.compute_unit_limit = units;
        self
    }

    pub fn with_identity(self, signer: SharedSigner) -> Self {
        self.connect(signer);
        self
    }

    /// Attach the signing identity used as payer and authority
    pub fn connect(&self, signer: SharedSigner) {
        info!(wallet = %signer.pubkey(), "Wallet connected");
        *self.identity.write() = Some(signer);
    }

    pub fn disconnect(&self) {
        if self.identity.write().take().is_some() {
            info!("Wallet disconnected");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.identity.read().is_some()
    }

    pub fn deriver(&self) -> &AddressDeriver {
        &self.deriver
    }

    fn wallet(&self) -> Result<Pubkey, ProtocolError> {
        self.identity
            .read()
            .as_ref()
            .map(|signer| signer.pubkey())
            .ok_or_else(|| ProtocolError::PreconditionUnmet("wallet not connected".into()))
    }

    fn program_id(&self) -> &Pubkey {
        self.deriver.program_id()
    }

    async fn fetch_required(
        &self,
        account: &'static str,
        address: &Pubkey,
    ) -> Result<Vec<u8>, ProtocolError> {
        self.reader
            .fetch_account_data(address)
            .await?
            .ok_or(ProtocolError::AccountNotFound {
                account,
                address: *address,
            })
    }

    async fn protocol_config(&self, address: &Pubkey) -> Result<ProtocolConfigAccount, ProtocolError> {
        match self.reader.fetch_account_data(address).await? {
            Some(data) => Ok(ProtocolConfigAccount::decode(&data)?),
            None => Err(ProtocolError::PreconditionUnmet(
                "protocol config is not initialized".into(),
            )),
        }
    }

    async fn market_account(&self, address: &Pubkey) -> Result<MarketAccount, ProtocolError> {
        let data = self.fetch_required("market", address).await?;
        Ok(MarketAccount::decode(&data)?)
    }

    // ------------------------------------------------------------------
    // Builders
    // ------------------------------------------------------------------

    pub async fn build_initialize_config(
        &self,
        platform_fee_bps: u16,
        yield_fee_bps: u16,
    ) -> Result<PendingOperation, ProtocolError> {
        let admin = self.wallet()?;
        require(platform_fee_bps <= 10_000, "platform fee above 100%")?;
        require(yield_fee_bps <= 10_000, "yield fee above 100%")?;
        let mut op = PendingOperation::new(Action::InitializeConfig, admin);

        let config = self.deriver.config()?.address;
        op.advance(OperationState::AccountsDerived)?;

        require(
            !self.reader.account_exists(&config).await?,
            "protocol config is already initialized",
        )?;
        op.advance(OperationState::DependencyChecked)?;

        // The admin wallet also receives the yield share until a distributor exists
        let ix = instructions::initialize_config(
            self.program_id(),
            &config,
            &admin,
            &admin,
            platform_fee_bps,
            yield_fee_bps,
        )?;
        op.assemble(self.compute_unit_limit, Vec::new(), ix)?;
        Ok(op)
    }

    pub async fn build_create_business(
        &self,
        request: &CreateBusinessRequest,
    ) -> Result<PendingOperation, ProtocolError> {
        let creator = self.wallet()?;
        let ticker = request.ticker.trim();
        let name = request.name.trim();
        require(
            (1..=instructions::MAX_TICKER_LEN).contains(&ticker.len()),
            format!("ticker must be 1-{} bytes", instructions::MAX_TICKER_LEN),
        )?;
        require(
            (1..=instructions::MAX_NAME_LEN).contains(&name.len()),
            format!("name must be 1-{} bytes", instructions::MAX_NAME_LEN),
        )?;
        let mut op = PendingOperation::new(Action::CreateBusiness, creator);

        let config = self.deriver.config()?.address;
        let addresses = self.deriver.business(&creator, ticker)?;
        op.advance(OperationState::AccountsDerived)?;

        self.protocol_config(&config).await?;
        require(
            !self.reader.account_exists(&addresses.mint).await?,
            format!("{} is already launched by this wallet", ticker),
        )?;
        op.advance(OperationState::DependencyChecked)?;

        let accounts = LaunchAccounts {
            config,
            mint: addresses.mint,
            curve: addresses.curve,
            vesting: addresses.vesting,
            curve_token_vault: addresses.curve_token_vault,
            vesting_token_vault: addresses.vesting_vault,
            creator,
        };
        let ix = instructions::create_business(
            self.program_id(),
            &accounts,
            name,
            ticker,
            &request.description,
            request.sector,
        )?;
        op.assemble(self.compute_unit_limit, Vec::new(), ix)?;

        let price = INITIAL_PRICE;
        op.speculative_row = Some(DerivedBusinessRow {
            id: addresses.curve.to_string(),
            mint_address: addresses.mint.to_string(),
            metadata: BusinessMetadata::new(
                ticker,
                name,
                request.sector,
                &request.description,
                LAUNCHED_REGION,
            ),
            price,
            market_cap: pricing::market_cap(price, DEFAULT_TOTAL_SUPPLY),
            volume: 0.0,
            apy: pricing::heuristic_apy(0),
            takeover: Takeover::default(),
            status: RowStatus::Speculative,
        });
        Ok(op)
    }

    /// Buy (`is_buy`, amount in lamports) or sell (amount in token units)
    pub async fn build_swap(
        &self,
        mint: &Pubkey,
        is_buy: bool,
        amount: u64,
        min_out: u64,
    ) -> Result<PendingOperation, ProtocolError> {
        let user = self.wallet()?;
        require(amount > 0, "swap amount must be positive")?;
        let mut op = PendingOperation::new(Action::Swap, user);

        let config = self.deriver.config()?.address;
        let curve = self.deriver.curve(mint)?.address;
        let user_token_account = self.deriver.token_account(&user, mint);
        let curve_token_vault = self.deriver.token_account(&curve, mint);
        op.advance(OperationState::AccountsDerived)?;

        let fees = self.protocol_config(&config).await?;
        self.fetch_required("curve", &curve).await?;
        let mut prerequisites = Vec::new();
        if !self.reader.account_exists(&user_token_account).await? {
            debug!(account = %user_token_account, "User token account missing, adding creation");
            prerequisites.push(instructions::create_token_account(&user, &user, mint));
            op.created_accounts.push(user_token_account);
        }
        op.advance(OperationState::DependencyChecked)?;

        let accounts = SwapAccounts {
            config,
            curve,
            user,
            user_token_account,
            curve_token_vault,
            admin_treasury: fees.admin,
            yield_distributor: fees.yield_distributor,
        };
        let ix = instructions::swap(self.program_id(), &accounts, is_buy, amount, min_out)?;
        op.assemble(self.compute_unit_limit, prerequisites, ix)?;
        Ok(op)
    }

    pub async fn build_initiate_takeover(
        &self,
        mint: &Pubkey,
    ) -> Result<PendingOperation, ProtocolError> {
        let user = self.wallet()?;
        let mut op = PendingOperation::new(Action::InitiateTakeover, user);

        let curve = self.deriver.curve(mint)?.address;
        let user_token_account = self.deriver.token_account(&user, mint);
        op.advance(OperationState::AccountsDerived)?;

        let state = BondingCurveAccount::decode(&self.fetch_required("curve", &curve).await?)?;
        require(!state.takeover_active, "a takeover is already in progress")?;
        // The stake is read from this account, creating it empty cannot succeed
        require(
            self.reader.account_exists(&user_token_account).await?,
            "wallet holds no tokens of this business",
        )?;
        op.advance(OperationState::DependencyChecked)?;

        let ix = instructions::initiate_takeover(self.program_id(), &curve, &user, &user_token_account)?;
        op.assemble(self.compute_unit_limit, Vec::new(), ix)?;
        Ok(op)
    }

    pub async fn build_sabotage(&self, mint: &Pubkey) -> Result<PendingOperation, ProtocolError> {
        let user = self.wallet()?;
        let mut op = PendingOperation::new(Action::Sabotage, user);

        let config = self.deriver.config()?.address;
        let curve = self.deriver.curve(mint)?.address;
        op.advance(OperationState::AccountsDerived)?;

        let fees = self.protocol_config(&config).await?;
        self.fetch_required("curve", &curve).await?;
        op.advance(OperationState::DependencyChecked)?;

        let ix = instructions::sabotage(
            self.program_id(),
            &config,
            &curve,
            &user,
            &fees.admin,
            &fees.yield_distributor,
        )?;
        op.assemble(self.compute_unit_limit, Vec::new(), ix)?;
        Ok(op)
    }

    pub async fn build_create_market(
        &self,
        id: &MarketId,
        title: &str,
        end_timestamp: i64,
    ) -> Result<PendingOperation, ProtocolError> {
        let authority = self.wallet()?;
        require(
            !title.trim().is_empty() && title.len() <= instructions::MAX_MARKET_TITLE_LEN,
            format!(
                "market title must be 1-{} bytes",
                instructions::MAX_MARKET_TITLE_LEN
            ),
        )?;
        let mut op = PendingOperation::new(Action::CreateMarket, authority);

        let market = self.deriver.market(id)?.address;
        op.advance(OperationState::AccountsDerived)?;

        require(
            !self.reader.account_exists(&market).await?,
            format!("market {} already exists", id),
        )?;
        op.advance(OperationState::DependencyChecked)?;

        let ix = instructions::create_market(
            self.program_id(),
            &market,
            &authority,
            id.ledger_id(),
            title,
            end_timestamp,
        )?;
        op.assemble(self.compute_unit_limit, Vec::new(), ix)?;
        Ok(op)
    }

    pub async fn build_resolve_market(
        &self,
        id: &MarketId,
        outcome: bool,
    ) -> Result<PendingOperation, ProtocolError> {
        let oracle = self.wallet()?;
        let mut op = PendingOperation::new(Action::ResolveMarket, oracle);

        let market = self.deriver.market(id)?.address;
        op.advance(OperationState::AccountsDerived)?;

        let state = self.market_account(&market).await?;
        require(!state.resolved, format!("market {} is already resolved", id))?;
        require(
            state.oracle == oracle,
            format!("only the oracle {} can resolve market {}", state.oracle, id),
        )?;
        op.advance(OperationState::DependencyChecked)?;

        let ix = instructions::resolve_market(self.program_id(), &market, &oracle, outcome)?;
        op.assemble(self.compute_unit_limit, Vec::new(), ix)?;
        Ok(op)
    }

    pub async fn build_place_bet(
        &self,
        id: &MarketId,
        outcome: bool,
        amount: u64,
    ) -> Result<PendingOperation, ProtocolError> {
        let user = self.wallet()?;
        require(amount > 0, "bet amount must be positive")?;
        let mut op = PendingOperation::new(Action::PlaceBet, user);

        let market = self.deriver.market(id)?.address;
        op.advance(OperationState::AccountsDerived)?;

        let state = self.market_account(&market).await?;
        require(!state.resolved, format!("market {} is already resolved", id))?;
        op.advance(OperationState::DependencyChecked)?;

        let ix = instructions::place_bet(self.program_id(), &market, &user, outcome, amount)?;
        op.assemble(self.compute_unit_limit, Vec::new(), ix)?;
        Ok(op)
    }

    // ------------------------------------------------------------------
    // Submission
    // ------------------------------------------------------------------

    /// Sign and submit an assembled operation.
    ///
    /// `Err` is only returned for local preconditions: no wallet, a wallet
    /// other than the one that built the operation, or an invalid state
    /// transition. Everything after signing comes back as an outcome.
    /// `Rejected` with `ProtocolError::Ledger` covers transport failures and
    /// confirmation timeouts, so the transaction may still have landed.
    pub async fn submit(&self, mut op: PendingOperation) -> Result<OperationOutcome, ProtocolError> {
        let signer = self
            .identity
            .read()
            .clone()
            .ok_or_else(|| ProtocolError::PreconditionUnmet("wallet not connected".into()))?;
        require(
            signer.pubkey() == op.payer,
            "operation was built for a different wallet",
        )?;
        op.advance(OperationState::Submitted)?;

        match self.writer.submit(&op.instructions, signer.as_ref()).await {
            Ok(signature) => {
                op.advance(OperationState::Confirmed)?;
                info!(operation_id = %op.id, action = %op.action, %signature, "Operation confirmed");
                Ok(OperationOutcome::Confirmed {
                    operation_id: op.id,
                    action: op.action,
                    signature,
                })
            }
            Err(e) => {
                op.advance(OperationState::Rejected)?;
                let error = ProtocolError::from(e);
                warn!(operation_id = %op.id, action = %op.action, "Operation rejected: {}", error);
                Ok(OperationOutcome::Rejected {
                    operation_id: op.id,
                    action: op.action,
                    error,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine_forward_only() {
        use OperationState::*;
        assert!(Unvalidated.can_transition_to(AccountsDerived));
        assert!(Submitted.can_transition_to(Rejected));
        assert!(!Rejected.can_transition_to(Unvalidated));
        assert!(!Unvalidated.can_transition_to(Assembled));
        assert!(!Confirmed.can_transition_to(Rejected));
        assert!(Rejected.is_terminal());
        assert!(!Assembled.is_terminal());
    }

    #[test]
    fn test_advance_rejects_skips() {
        let mut op = PendingOperation::new(Action::Swap, Pubkey::new_unique());
        let err = op.advance(OperationState::Submitted).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::InvalidTransition {
                from: OperationState::Unvalidated,
                to: OperationState::Submitted
            }
        ));
        assert_eq!(op.state(), OperationState::Unvalidated);
    }

    #[test]
    fn test_ledger_rejection_is_verbatim() {
        let err = ProtocolError::from(LedgerError::Rejected {
            message: "custom program error: 0x1771".into(),
            logs: vec!["Program log: slippage".into()],
        });
        match err {
            ProtocolError::SubmissionRejected { message, logs } => {
                assert_eq!(message, "custom program error: 0x1771");
                assert_eq!(logs, vec!["Program log: slippage".to_string()]);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            ProtocolError::from(LedgerError::Rpc("timeout".into())),
            ProtocolError::Ledger(_)
        ));
    }

    #[test]
    fn test_assemble_orders_compute_budget_first() {
        let payer = Pubkey::new_unique();
        let mint = Pubkey::new_unique();
        let mut op = PendingOperation::new(Action::Swap, payer);
        op.advance(OperationState::AccountsDerived).unwrap();
        op.advance(OperationState::DependencyChecked).unwrap();

        let primary = instructions::place_bet(&Pubkey::new_unique(), &Pubkey::new_unique(), &payer, true, 1)
            .unwrap();
        let create = instructions::create_token_account(&payer, &payer, &mint);
        op.assemble(COMPUTE_UNIT_LIMIT, vec![create.clone()], primary.clone())
            .unwrap();

        assert_eq!(op.instructions().len(), 3);
        assert_eq!(
            op.instructions()[0],
            instructions::compute_budget(COMPUTE_UNIT_LIMIT)
        );
        assert_eq!(op.instructions()[1], create);
        assert_eq!(op.instructions()[2], primary);
        assert!(op.touched_accounts().contains(&payer));
        assert!(op.touched_accounts().contains(&mint));
        assert_eq!(op.state(), OperationState::Assembled);
    }
}
