//! Instruction encoders for the exchange program.
//!
//! Instruction data is the 8-byte `global:<name>` discriminator followed by
//! the borsh-encoded arguments. Account lists follow the program's account
//! structs field by field; the order is significant.

use super::ProtocolError;
use crate::derivation::{ASSOCIATED_TOKEN_PROGRAM_ID, TOKEN_PROGRAM_ID};
use crate::ledger::codec::instruction_discriminator;
use crate::ledger::LedgerSector;
use crate::models::Sector;
use borsh::BorshSerialize;
use solana_sdk::compute_budget::ComputeBudgetInstruction;
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::{system_program, sysvar};

pub const COMPUTE_UNIT_LIMIT: u32 = 1_000_000;

pub const MAX_TICKER_LEN: usize = 9;
pub const MAX_NAME_LEN: usize = 49;
pub const MAX_MARKET_TITLE_LEN: usize = 100;

/// The ledger only knows four sectors
pub fn ledger_sector(sector: Sector) -> LedgerSector {
    match sector {
        Sector::Mining => LedgerSector::Mining,
        Sector::Energy => LedgerSector::Energy,
        Sector::Terraforming => LedgerSector::Terraforming,
        Sector::Tech | Sector::Logistics | Sector::Governance => LedgerSector::Tech,
    }
}

pub fn compute_budget(units: u32) -> Instruction {
    ComputeBudgetInstruction::set_compute_unit_limit(units)
}

/// Create the associated token account of (`owner`, `mint`), paid by `payer`
pub fn create_token_account(payer: &Pubkey, owner: &Pubkey, mint: &Pubkey) -> Instruction {
    spl_associated_token_account::instruction::create_associated_token_account(
        payer,
        owner,
        mint,
        &TOKEN_PROGRAM_ID,
    )
}

#[derive(BorshSerialize)]
struct InitializeConfigArgs {
    platform_fee_bps: u16,
    yield_fee_bps: u16,
}

#[derive(BorshSerialize)]
struct CreateBusinessArgs<'a> {
    name: &'a str,
    symbol: &'a str,
    uri: &'a str,
    sector: LedgerSector,
}

#[derive(BorshSerialize)]
struct SwapArgs {
    is_buy: bool,
    amount: u64,
    min_out: u64,
}

#[derive(BorshSerialize)]
struct CreateMarketArgs<'a> {
    id: u64,
    title: &'a str,
    end_timestamp: i64,
}

#[derive(BorshSerialize)]
struct ResolveMarketArgs {
    outcome: bool,
}

#[derive(BorshSerialize)]
struct PlaceBetArgs {
    outcome: bool,
    amount: u64,
}

/// Discriminator for `name` followed by the borsh encoding of `args`
pub fn encode_instruction_data<T: BorshSerialize>(
    name: &str,
    args: &T,
) -> Result<Vec<u8>, ProtocolError> {
    let mut data = instruction_discriminator(name).to_vec();
    let encoded = borsh::to_vec(args)
        .map_err(|e| ProtocolError::Encoding(format!("{}: {}", name, e)))?;
    data.extend_from_slice(&encoded);
    Ok(data)
}

fn instruction(
    program_id: &Pubkey,
    data: Vec<u8>,
    accounts: Vec<AccountMeta>,
) -> Instruction {
    Instruction {
        program_id: *program_id,
        accounts,
        data,
    }
}

pub fn initialize_config(
    program_id: &Pubkey,
    config: &Pubkey,
    admin: &Pubkey,
    yield_distributor: &Pubkey,
    platform_fee_bps: u16,
    yield_fee_bps: u16,
) -> Result<Instruction, ProtocolError> {
    let data = encode_instruction_data(
        "initialize_config",
        &InitializeConfigArgs {
            platform_fee_bps,
            yield_fee_bps,
        },
    )?;
    Ok(instruction(
        program_id,
        data,
        vec![
            AccountMeta::new(*config, false),
            AccountMeta::new(*admin, true),
            AccountMeta::new_readonly(*yield_distributor, false),
            AccountMeta::new_readonly(system_program::id(), false),
        ],
    ))
}

/// Accounts touched by `create_business`
#[derive(Debug, Clone, Copy)]
pub struct LaunchAccounts {
    pub config: Pubkey,
    pub mint: Pubkey,
    pub curve: Pubkey,
    pub vesting: Pubkey,
    pub curve_token_vault: Pubkey,
    pub vesting_token_vault: Pubkey,
    pub creator: Pubkey,
}

pub fn create_business(
    program_id: &Pubkey,
    accounts: &LaunchAccounts,
    name: &str,
    symbol: &str,
    description: &str,
    sector: Sector,
) -> Result<Instruction, ProtocolError> {
    // The description travels in the metadata uri slot
    let data = encode_instruction_data(
        "create_business",
        &CreateBusinessArgs {
            name,
            symbol,
            uri: description,
            sector: ledger_sector(sector),
        },
    )?;
    Ok(instruction(
        program_id,
        data,
        vec![
            AccountMeta::new(accounts.config, false),
            AccountMeta::new(accounts.mint, false),
            AccountMeta::new(accounts.curve, false),
            AccountMeta::new(accounts.vesting, false),
            AccountMeta::new(accounts.curve_token_vault, false),
            AccountMeta::new(accounts.vesting_token_vault, false),
            AccountMeta::new(accounts.creator, true),
            AccountMeta::new_readonly(system_program::id(), false),
            AccountMeta::new_readonly(TOKEN_PROGRAM_ID, false),
            AccountMeta::new_readonly(ASSOCIATED_TOKEN_PROGRAM_ID, false),
            AccountMeta::new_readonly(sysvar::rent::id(), false),
        ],
    ))
}

/// Accounts touched by `swap`
#[derive(Debug, Clone, Copy)]
pub struct SwapAccounts {
    pub config: Pubkey,
    pub curve: Pubkey,
    pub user: Pubkey,
    pub user_token_account: Pubkey,
    pub curve_token_vault: Pubkey,
    pub admin_treasury: Pubkey,
    pub yield_distributor: Pubkey,
}

pub fn swap(
    program_id: &Pubkey,
    accounts: &SwapAccounts,
    is_buy: bool,
    amount: u64,
    min_out: u64,
) -> Result<Instruction, ProtocolError> {
    let data = encode_instruction_data(
        "swap",
        &SwapArgs {
            is_buy,
            amount,
            min_out,
        },
    )?;
    Ok(instruction(
        program_id,
        data,
        vec![
            AccountMeta::new(accounts.config, false),
            AccountMeta::new(accounts.curve, false),
            AccountMeta::new(accounts.user, true),
            AccountMeta::new(accounts.user_token_account, false),
            AccountMeta::new(accounts.curve_token_vault, false),
            AccountMeta::new(accounts.admin_treasury, false),
            AccountMeta::new(accounts.yield_distributor, false),
            AccountMeta::new_readonly(TOKEN_PROGRAM_ID, false),
            AccountMeta::new_readonly(system_program::id(), false),
        ],
    ))
}

pub fn initiate_takeover(
    program_id: &Pubkey,
    curve: &Pubkey,
    user: &Pubkey,
    user_token_account: &Pubkey,
) -> Result<Instruction, ProtocolError> {
    let data = encode_instruction_data("initiate_takeover", &())?;
    Ok(instruction(
        program_id,
        data,
        vec![
            AccountMeta::new(*curve, false),
            AccountMeta::new(*user, true),
            AccountMeta::new(*user_token_account, false),
        ],
    ))
}

pub fn sabotage(
    program_id: &Pubkey,
    config: &Pubkey,
    curve: &Pubkey,
    user: &Pubkey,
    admin_treasury: &Pubkey,
    yield_distributor: &Pubkey,
) -> Result<Instruction, ProtocolError> {
    let data = encode_instruction_data("sabotage", &())?;
    Ok(instruction(
        program_id,
        data,
        vec![
            AccountMeta::new(*config, false),
            AccountMeta::new(*curve, false),
            AccountMeta::new(*user, true),
            AccountMeta::new(*admin_treasury, false),
            AccountMeta::new(*yield_distributor, false),
            AccountMeta::new_readonly(system_program::id(), false),
        ],
    ))
}

pub fn create_market(
    program_id: &Pubkey,
    market: &Pubkey,
    authority: &Pubkey,
    id: u64,
    title: &str,
    end_timestamp: i64,
) -> Result<Instruction, ProtocolError> {
    let data = encode_instruction_data(
        "create_market",
        &CreateMarketArgs {
            id,
            title,
            end_timestamp,
        },
    )?;
    Ok(instruction(
        program_id,
        data,
        vec![
            AccountMeta::new(*market, false),
            AccountMeta::new(*authority, true),
            AccountMeta::new_readonly(system_program::id(), false),
        ],
    ))
}

pub fn resolve_market(
    program_id: &Pubkey,
    market: &Pubkey,
    oracle: &Pubkey,
    outcome: bool,
) -> Result<Instruction, ProtocolError> {
    let data = encode_instruction_data("resolve_market", &ResolveMarketArgs { outcome })?;
    Ok(instruction(
        program_id,
        data,
        vec![
            AccountMeta::new(*market, false),
            AccountMeta::new_readonly(*oracle, true),
        ],
    ))
}

pub fn place_bet(
    program_id: &Pubkey,
    market: &Pubkey,
    user: &Pubkey,
    outcome: bool,
    amount: u64,
) -> Result<Instruction, ProtocolError> {
    let data = encode_instruction_data("place_bet", &PlaceBetArgs { outcome, amount })?;
    Ok(instruction(
        program_id,
        data,
        vec![
            AccountMeta::new(*market, false),
            AccountMeta::new(*user, true),
            AccountMeta::new_readonly(system_program::id(), false),
        ],
    ))
}
