use alloy_primitives::{Address, B256};
use alloy_sol_types::{sol, SolEvent};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const SOL_MINT: &str = "So11111111111111111111111111111111111111112";
const LAMPORTS_PER_SOL: f64 = 1_000_000_000.0;

const BASE_WETH: &str = "0x4200000000000000000000000000000000000006";
const WEI_PER_ETH: f64 = 1e18;

// Transfer logs carry no decimals; 18 is exact for the wrapped-native leg
// and the default for token legs.
const EVM_DEFAULT_DECIMALS: f64 = 1e18;

// ---------------------------------------------------------------------------
// ABI
// ---------------------------------------------------------------------------

sol! {
    event Transfer(address indexed from, address indexed to, uint256 value);
}

// ---------------------------------------------------------------------------
// Chain tags
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Chain {
    Solana,
    Base,
}

impl Chain {
    pub fn parse(s: &str) -> Option<Chain> {
        match s.to_ascii_lowercase().as_str() {
            "solana" => Some(Chain::Solana),
            "base" => Some(Chain::Base),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Solana => "solana",
            Chain::Base => "base",
        }
    }

    pub(crate) fn coingecko_id(&self) -> &'static str {
        match self {
            Chain::Solana => "solana",
            Chain::Base => "ethereum",
        }
    }

    /// Originating wallet of a provider payload (fee payer / tx sender).
    /// Used to match incoming traffic against tracked agent wallets.
    pub fn wallet_of(&self, payload: &Value) -> Option<String> {
        match self {
            Chain::Solana => Some(payload.get("feePayer")?.as_str()?.to_string()),
            Chain::Base => Some(payload.get("from")?.as_str()?.to_lowercase()),
        }
    }

    /// Decode a provider-native transaction payload into a canonical swap.
    /// `None` means "not a recognized swap for this wallet" — most payloads
    /// on a watched address are transfers, approvals, or noise, so this is
    /// the common case and never an error.
    pub fn normalize(&self, wallet: &str, payload: &Value) -> Option<SwapEvent> {
        match self {
            Chain::Solana => decode_solana(wallet, payload),
            Chain::Base => decode_evm(wallet, payload),
        }
    }
}

// ---------------------------------------------------------------------------
// Canonical swap event
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "buy",
            TradeSide::Sell => "sell",
        }
    }
}

/// Chain-agnostic view of one settled swap. Amounts are decimal-adjusted.
#[derive(Clone, Debug)]
pub struct SwapEvent {
    pub signature: String,
    pub block_time: i64,
    pub platform: String,
    pub side: TradeSide,
    pub input_mint: String,
    pub input_amount: f64,
    pub output_mint: String,
    pub output_amount: f64,
    /// Base-asset units on the native leg (input on buys, output on sells).
    pub native_amount: f64,
}

// ---------------------------------------------------------------------------
// Solana (enhanced-transaction payloads)
// ---------------------------------------------------------------------------

fn decode_solana(wallet: &str, payload: &Value) -> Option<SwapEvent> {
    let signature = payload.get("signature")?.as_str()?.to_string();
    let block_time = payload.get("timestamp")?.as_i64()?;
    let platform = payload
        .get("source")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_lowercase();

    // DEX-router trades arrive with a parsed swap event; bonding-curve
    // trades don't, and have to be reconstructed from raw transfers.
    if let Some(swap) = payload.pointer("/events/swap") {
        decode_solana_swap(wallet, swap, signature, block_time, platform)
    } else {
        decode_solana_transfers(wallet, payload, signature, block_time, platform)
    }
}

fn decode_solana_swap(
    wallet: &str,
    swap: &Value,
    signature: String,
    block_time: i64,
    platform: String,
) -> Option<SwapEvent> {
    let native_in = native_leg_amount(swap.get("nativeInput"));
    let native_out = native_leg_amount(swap.get("nativeOutput"));

    if native_in > 0.0 {
        // SOL in, token out
        let (mint, amount) = token_leg(swap.get("tokenOutputs"), wallet)?;
        Some(SwapEvent {
            signature,
            block_time,
            platform,
            side: TradeSide::Buy,
            input_mint: SOL_MINT.to_string(),
            input_amount: native_in,
            output_mint: mint,
            output_amount: amount,
            native_amount: native_in,
        })
    } else if native_out > 0.0 {
        // Token in, SOL out
        let (mint, amount) = token_leg(swap.get("tokenInputs"), wallet)?;
        Some(SwapEvent {
            signature,
            block_time,
            platform,
            side: TradeSide::Sell,
            input_mint: mint,
            input_amount: amount,
            output_mint: SOL_MINT.to_string(),
            output_amount: native_out,
            native_amount: native_out,
        })
    } else {
        // Token-to-token swaps have no base-asset leg to price; skip.
        None
    }
}

/// `{"account": ..., "amount": "<lamports>"}` → SOL units.
fn native_leg_amount(leg: Option<&Value>) -> f64 {
    leg.and_then(|l| l.get("amount"))
        .and_then(|a| match a {
            Value::String(s) => s.parse::<f64>().ok(),
            other => other.as_f64(),
        })
        .map(|lamports| lamports / LAMPORTS_PER_SOL)
        .unwrap_or(0.0)
}

/// First token leg belonging to the wallet (falling back to the first leg),
/// decimal-adjusted via `rawTokenAmount`.
fn token_leg(legs: Option<&Value>, wallet: &str) -> Option<(String, f64)> {
    let legs = legs?.as_array()?;
    let leg = legs
        .iter()
        .find(|l| l.get("userAccount").and_then(|v| v.as_str()) == Some(wallet))
        .or_else(|| legs.first())?;

    let mint = leg.get("mint")?.as_str()?.to_string();
    let raw = leg.get("rawTokenAmount")?;
    let amount: f64 = raw.get("tokenAmount")?.as_str()?.parse().ok()?;
    let decimals = raw.get("decimals")?.as_u64()? as i32;
    Some((mint, amount / 10f64.powi(decimals)))
}

/// Bonding-curve fallback: no swap event, but the wallet moved SOL one way
/// and tokens the other within the same transaction.
fn decode_solana_transfers(
    wallet: &str,
    payload: &Value,
    signature: String,
    block_time: i64,
    platform: String,
) -> Option<SwapEvent> {
    let token_transfers = payload.get("tokenTransfers")?.as_array()?;
    let native_transfers = payload.get("nativeTransfers")?.as_array()?;

    let lamports_out: f64 = native_transfers
        .iter()
        .filter(|t| t.get("fromUserAccount").and_then(|v| v.as_str()) == Some(wallet))
        .filter_map(|t| t.get("amount").and_then(|a| a.as_f64()))
        .sum();
    let lamports_in: f64 = native_transfers
        .iter()
        .filter(|t| t.get("toUserAccount").and_then(|v| v.as_str()) == Some(wallet))
        .filter_map(|t| t.get("amount").and_then(|a| a.as_f64()))
        .sum();

    let token_in = token_transfers
        .iter()
        .find(|t| t.get("toUserAccount").and_then(|v| v.as_str()) == Some(wallet));
    let token_out = token_transfers
        .iter()
        .find(|t| t.get("fromUserAccount").and_then(|v| v.as_str()) == Some(wallet));

    if let Some(t) = token_in {
        if lamports_out > 0.0 {
            let mint = t.get("mint")?.as_str()?.to_string();
            let amount = t.get("tokenAmount")?.as_f64()?;
            let sol = lamports_out / LAMPORTS_PER_SOL;
            return Some(SwapEvent {
                signature,
                block_time,
                platform,
                side: TradeSide::Buy,
                input_mint: SOL_MINT.to_string(),
                input_amount: sol,
                output_mint: mint,
                output_amount: amount,
                native_amount: sol,
            });
        }
    }
    if let Some(t) = token_out {
        if lamports_in > 0.0 {
            let mint = t.get("mint")?.as_str()?.to_string();
            let amount = t.get("tokenAmount")?.as_f64()?;
            let sol = lamports_in / LAMPORTS_PER_SOL;
            return Some(SwapEvent {
                signature,
                block_time,
                platform,
                side: TradeSide::Sell,
                input_mint: mint,
                input_amount: amount,
                output_mint: SOL_MINT.to_string(),
                output_amount: sol,
                native_amount: sol,
            });
        }
    }
    None
}

// ---------------------------------------------------------------------------
// EVM (Base) — ERC-20 Transfer logs + tx value
// ---------------------------------------------------------------------------

struct Erc20Transfer {
    token: Address,
    from: Address,
    to: Address,
    amount: u128,
}

fn decode_evm(wallet: &str, payload: &Value) -> Option<SwapEvent> {
    let signature = payload.get("hash")?.as_str()?.to_string();
    let block_time = payload.get("timestamp")?.as_i64()?;
    let platform = payload
        .get("source")
        .and_then(|v| v.as_str())
        .unwrap_or("dex-router")
        .to_lowercase();

    let wallet_addr: Address = wallet.parse().ok()?;
    let weth: Address = BASE_WETH.parse().ok()?;

    let value_wei = payload
        .get("value")
        .and_then(|v| match v {
            Value::String(s) => parse_quantity(s),
            other => other.as_u64().map(u128::from),
        })
        .unwrap_or(0);

    let logs = payload.get("logs")?.as_array()?;
    let transfers: Vec<Erc20Transfer> = logs.iter().filter_map(decode_transfer_log).collect();

    let weth_out: u128 = transfers
        .iter()
        .filter(|t| t.token == weth && t.from == wallet_addr)
        .map(|t| t.amount)
        .sum();
    let weth_in: u128 = transfers
        .iter()
        .filter(|t| t.token == weth && t.to == wallet_addr)
        .map(|t| t.amount)
        .sum();
    let token_in = transfers
        .iter()
        .find(|t| t.token != weth && t.to == wallet_addr);
    let token_out = transfers
        .iter()
        .find(|t| t.token != weth && t.from == wallet_addr);

    let native_spent = value_wei + weth_out;
    if let Some(t) = token_in {
        if native_spent > 0 {
            let native = native_spent as f64 / WEI_PER_ETH;
            return Some(SwapEvent {
                signature,
                block_time,
                platform,
                side: TradeSide::Buy,
                input_mint: BASE_WETH.to_string(),
                input_amount: native,
                output_mint: format!("{:#x}", t.token),
                output_amount: t.amount as f64 / EVM_DEFAULT_DECIMALS,
                native_amount: native,
            });
        }
    }
    if let Some(t) = token_out {
        if weth_in > 0 {
            let native = weth_in as f64 / WEI_PER_ETH;
            return Some(SwapEvent {
                signature,
                block_time,
                platform,
                side: TradeSide::Sell,
                input_mint: format!("{:#x}", t.token),
                input_amount: t.amount as f64 / EVM_DEFAULT_DECIMALS,
                output_mint: BASE_WETH.to_string(),
                output_amount: native,
                native_amount: native,
            });
        }
    }
    None
}

fn decode_transfer_log(log: &Value) -> Option<Erc20Transfer> {
    let token: Address = log.get("address")?.as_str()?.parse().ok()?;

    let topics: Vec<B256> = log
        .get("topics")?
        .as_array()?
        .iter()
        .filter_map(|t| t.as_str())
        .filter_map(|t| t.parse::<B256>().ok())
        .collect();

    if topics.len() != 3 || topics[0] != Transfer::SIGNATURE_HASH {
        return None;
    }

    let data = hex::decode(log.get("data")?.as_str()?.trim_start_matches("0x")).ok()?;
    let decoded = Transfer::decode_raw_log(topics.iter().copied(), &data).ok()?;
    let amount: u128 = decoded.value.try_into().ok()?;

    Some(Erc20Transfer {
        token,
        from: decoded.from,
        to: decoded.to,
        amount,
    })
}

/// Hex ("0x...") or decimal quantity string → u128.
fn parse_quantity(s: &str) -> Option<u128> {
    if let Some(hex) = s.strip_prefix("0x") {
        u128::from_str_radix(hex, 16).ok()
    } else {
        s.parse().ok()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const WALLET: &str = "AgentWa11etPubkey111111111111111111111111111";
    const MINT: &str = "TokenMint1111111111111111111111111111111111";

    fn solana_swap_buy() -> Value {
        json!({
            "signature": "5xY2kSwapSig",
            "timestamp": 1_754_000_000,
            "feePayer": WALLET,
            "source": "RAYDIUM",
            "events": {
                "swap": {
                    "nativeInput": { "account": WALLET, "amount": "2500000000" },
                    "tokenOutputs": [{
                        "userAccount": WALLET,
                        "mint": MINT,
                        "rawTokenAmount": { "tokenAmount": "150000000000", "decimals": 6 }
                    }]
                }
            }
        })
    }

    #[test]
    fn solana_swap_event_decodes_as_buy() {
        let swap = Chain::Solana.normalize(WALLET, &solana_swap_buy()).unwrap();
        assert_eq!(swap.side, TradeSide::Buy);
        assert_eq!(swap.signature, "5xY2kSwapSig");
        assert_eq!(swap.platform, "raydium");
        assert_eq!(swap.input_mint, SOL_MINT);
        assert!((swap.input_amount - 2.5).abs() < 1e-9);
        assert_eq!(swap.output_mint, MINT);
        assert!((swap.output_amount - 150_000.0).abs() < 1e-6);
        assert!((swap.native_amount - 2.5).abs() < 1e-9);
    }

    #[test]
    fn solana_bonding_curve_sell_reconstructed_from_transfers() {
        let payload = json!({
            "signature": "3pPumpSellSig",
            "timestamp": 1_754_000_100,
            "feePayer": WALLET,
            "source": "PUMP_FUN",
            "tokenTransfers": [{
                "fromUserAccount": WALLET,
                "toUserAccount": "CurveVau1t111111111111111111111111111111111",
                "mint": MINT,
                "tokenAmount": 90_000.0
            }],
            "nativeTransfers": [{
                "fromUserAccount": "CurveVau1t111111111111111111111111111111111",
                "toUserAccount": WALLET,
                "amount": 1_200_000_000u64
            }]
        });
        let swap = Chain::Solana.normalize(WALLET, &payload).unwrap();
        assert_eq!(swap.side, TradeSide::Sell);
        assert_eq!(swap.platform, "pump_fun");
        assert_eq!(swap.input_mint, MINT);
        assert!((swap.output_amount - 1.2).abs() < 1e-9);
        assert!((swap.native_amount - 1.2).abs() < 1e-9);
    }

    #[test]
    fn solana_plain_transfer_is_not_a_swap() {
        // Native transfer only — no token leg, must skip soft.
        let payload = json!({
            "signature": "2transferSig",
            "timestamp": 1_754_000_200,
            "feePayer": WALLET,
            "tokenTransfers": [],
            "nativeTransfers": [{
                "fromUserAccount": WALLET,
                "toUserAccount": "SomeOtherAccount1111111111111111111111111111",
                "amount": 5_000_000u64
            }]
        });
        assert!(Chain::Solana.normalize(WALLET, &payload).is_none());
    }

    #[test]
    fn malformed_payload_skips_without_panic() {
        assert!(Chain::Solana.normalize(WALLET, &json!({"junk": true})).is_none());
        assert!(Chain::Solana.normalize(WALLET, &json!("not an object")).is_none());
        assert!(Chain::Base.normalize("0x1111", &json!({"hash": 42})).is_none());
    }

    const EVM_WALLET: &str = "0x00000000000000000000000000000000000000aa";
    const EVM_TOKEN: &str = "0x00000000000000000000000000000000000000bb";
    const EVM_POOL: &str = "0x00000000000000000000000000000000000000cc";

    fn topic_for(addr: &str) -> String {
        format!("0x{}{}", "0".repeat(24), &addr[2..])
    }

    fn amount_data(amount: u128) -> String {
        format!("0x{:064x}", amount)
    }

    fn transfer_sig() -> String {
        format!("0x{}", hex::encode(Transfer::SIGNATURE_HASH))
    }

    #[test]
    fn evm_buy_from_value_and_token_transfer() {
        let payload = json!({
            "hash": "0xbuyhash",
            "timestamp": 1_754_000_300,
            "from": EVM_WALLET,
            "value": "1000000000000000000",
            "logs": [{
                "address": EVM_TOKEN,
                "topics": [transfer_sig(), topic_for(EVM_POOL), topic_for(EVM_WALLET)],
                "data": amount_data(5_000_000_000_000_000_000_000u128)
            }]
        });
        let swap = Chain::Base.normalize(EVM_WALLET, &payload).unwrap();
        assert_eq!(swap.side, TradeSide::Buy);
        assert_eq!(swap.input_mint, BASE_WETH);
        assert!((swap.input_amount - 1.0).abs() < 1e-9);
        assert_eq!(swap.output_mint, EVM_TOKEN);
        assert!((swap.output_amount - 5000.0).abs() < 1e-6);
    }

    #[test]
    fn evm_sell_pairs_token_out_with_weth_in() {
        let payload = json!({
            "hash": "0xsellhash",
            "timestamp": 1_754_000_400,
            "from": EVM_WALLET,
            "value": "0",
            "logs": [
                {
                    "address": EVM_TOKEN,
                    "topics": [transfer_sig(), topic_for(EVM_WALLET), topic_for(EVM_POOL)],
                    "data": amount_data(2_000_000_000_000_000_000_000u128)
                },
                {
                    "address": BASE_WETH,
                    "topics": [transfer_sig(), topic_for(EVM_POOL), topic_for(EVM_WALLET)],
                    "data": amount_data(750_000_000_000_000_000u128)
                }
            ]
        });
        let swap = Chain::Base.normalize(EVM_WALLET, &payload).unwrap();
        assert_eq!(swap.side, TradeSide::Sell);
        assert_eq!(swap.input_mint, EVM_TOKEN);
        assert_eq!(swap.output_mint, BASE_WETH);
        assert!((swap.native_amount - 0.75).abs() < 1e-9);
    }

    #[test]
    fn chain_tags_round_trip() {
        assert_eq!(Chain::parse("solana"), Some(Chain::Solana));
        assert_eq!(Chain::parse("Base"), Some(Chain::Base));
        assert_eq!(Chain::parse("dogechain"), None);
        assert_eq!(Chain::Solana.as_str(), "solana");
    }
}
