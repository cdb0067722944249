use anyhow::{anyhow, bail, Result};
use clap::ArgMatches;
use log::info;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::address::OffsetAddress;
use crate::codec::{
    bcd_to_int, bcd_word_to_int, decode_date_and_time, parse_literal, s5time_to_duration,
    s7_date_to_naive_date, s7_time_to_duration, tod_to_naive_time, ScalarKind, ScalarValue,
};
use crate::config::MirrorConfig;
use crate::plc::SimulatedDriver;
use crate::services::MirrorService;
use crate::utils::error::MirrorError;

pub const DEFAULT_CONFIG_PATH: &str = "plc_mirror.toml";

/// Runs the matched subcommand. Returns `false` when no subcommand was given
/// so the caller can fall back to running the mirror.
pub async fn handle_subcommands(matches: &ArgMatches) -> Result<bool> {
    if let Some(sub) = matches.subcommand_matches("run") {
        let seconds = sub.get_one::<u64>("seconds").copied();
        let dump = sub.get_flag("dump");
        run_service(matches, seconds, dump).await?;
        return Ok(true);
    }

    if let Some(sub) = matches.subcommand_matches("init-config") {
        let path = sub
            .get_one::<String>("path")
            .map(String::as_str)
            .unwrap_or(DEFAULT_CONFIG_PATH);
        init_config(path, sub.get_flag("force"))?;
        println!("✅ Configuration written to {}", path);
        return Ok(true);
    }

    if let Some(sub) = matches.subcommand_matches("resolve") {
        let offset = sub
            .get_one::<String>("offset")
            .ok_or_else(|| anyhow!("missing offset"))?;
        let base = sub.get_one::<String>("base").map(String::as_str);
        println!("{}", serde_json::to_string_pretty(&resolve_offset(offset, base)?)?);
        return Ok(true);
    }

    if let Some(sub) = matches.subcommand_matches("decode") {
        let kind = sub
            .get_one::<String>("type")
            .ok_or_else(|| anyhow!("missing --type"))?;
        let data = sub
            .get_one::<String>("hex")
            .ok_or_else(|| anyhow!("missing hex data"))?;
        info!("🔍 Decoding {} from {}", kind, data);
        println!("{}", serde_json::to_string_pretty(&decode_hex(kind, data)?)?);
        return Ok(true);
    }

    if let Some(sub) = matches.subcommand_matches("encode") {
        let literal = sub
            .get_one::<String>("literal")
            .ok_or_else(|| anyhow!("missing literal"))?;
        println!("{}", serde_json::to_string_pretty(&encode_literal(literal)?)?);
        return Ok(true);
    }

    Ok(false)
}

/// Mirrors every configured device against the simulated driver until
/// Ctrl+C, or for `seconds` when given.
pub async fn run_service(matches: &ArgMatches, seconds: Option<u64>, dump: bool) -> Result<()> {
    let config = MirrorConfig::from_matches(matches)?;
    let mut service = MirrorService::new(config)?;
    service.register_driver(Arc::new(SimulatedDriver::new()));
    service.start().await?;

    info!("🔄 Mirroring started. Press Ctrl+C to stop...");
    let shutdown = async move {
        match seconds {
            Some(seconds) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = tokio::time::sleep(Duration::from_secs(seconds)) => {
                        info!("⏱️  Run time of {}s elapsed", seconds);
                    }
                }
            }
            None => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    };
    service.run_until(shutdown).await?;

    if dump {
        println!("{}", serde_json::to_string_pretty(&service.snapshot())?);
    }
    service.stop().await;
    Ok(())
}

fn init_config(path: &str, force: bool) -> Result<()> {
    if Path::new(path).exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path);
    }
    MirrorConfig::default().save_to_file(path)?;
    Ok(())
}

fn resolve_offset(text: &str, base: Option<&str>) -> Result<Value, MirrorError> {
    let offset: OffsetAddress = text.parse()?;
    let absolute = match base {
        Some(base) => offset.relative_to(&base.parse::<OffsetAddress>()?),
        None => offset,
    };

    Ok(json!({
        "input": text,
        "byte_offset": absolute.byte_offset(),
        "bit_offset": absolute.bit_offset(),
        "is_bit": absolute.is_bit(),
        "address": absolute.to_string(),
    }))
}

fn fixed<const N: usize>(bytes: &[u8]) -> Result<[u8; N], MirrorError> {
    bytes.try_into().map_err(|_| {
        MirrorError::InvalidData(format!("expected {} byte(s), got {}", N, bytes.len()))
    })
}

fn scalar_kind(name: &str) -> Option<ScalarKind> {
    Some(match name {
        "bool" => ScalarKind::Bool,
        "byte" => ScalarKind::Byte,
        "short" => ScalarKind::Short,
        "int" => ScalarKind::Int,
        "long" => ScalarKind::Long,
        "float" => ScalarKind::Float,
        "double" => ScalarKind::Double,
        _ => return None,
    })
}

/// Decodes hex-encoded device bytes as the named PLC type.
fn decode_hex(kind: &str, data: &str) -> Result<Value, MirrorError> {
    let bytes = hex::decode(data.trim_start_matches("0x"))
        .map_err(|e| MirrorError::InvalidData(format!("bad hex '{}': {}", data, e)))?;

    let value = match kind.to_ascii_lowercase().as_str() {
        "bcd" => match bytes.len() {
            1 => json!(bcd_to_int(bytes[0])),
            _ => json!(bcd_word_to_int(u16::from_be_bytes(fixed(&bytes)?))),
        },
        "s5time" => {
            let duration = s5time_to_duration(u16::from_be_bytes(fixed(&bytes)?));
            json!({ "milliseconds": duration.num_milliseconds() })
        }
        "time" => {
            let duration = s7_time_to_duration(u32::from_be_bytes(fixed(&bytes)?));
            json!({ "milliseconds": duration.num_milliseconds() })
        }
        "date" => json!(s7_date_to_naive_date(i16::from_be_bytes(fixed(&bytes)?)).to_string()),
        "tod" => json!(tod_to_naive_time(u32::from_be_bytes(fixed(&bytes)?)).to_string()),
        "dt" => match decode_date_and_time(&bytes) {
            Some(timestamp) => json!(timestamp.format("%Y-%m-%d %H:%M:%S%.3f").to_string()),
            None => {
                return Err(MirrorError::InvalidData(format!(
                    "'{}' is not a DATE_AND_TIME",
                    data
                )))
            }
        },
        other => {
            let kind = scalar_kind(other)
                .ok_or_else(|| MirrorError::InvalidData(format!("unknown type '{}'", other)))?;
            if bytes.len() != kind.width() {
                return Err(MirrorError::InvalidData(format!(
                    "{} needs {} byte(s), got {}",
                    other,
                    kind.width(),
                    bytes.len()
                )));
            }
            let value = ScalarValue::decode(kind, &bytes)
                .ok_or_else(|| MirrorError::InvalidData(format!("cannot decode '{}'", data)))?;
            serde_json::to_value(value)?
        }
    };

    Ok(json!({ "type": kind, "hex": hex::encode(&bytes), "value": value }))
}

/// Encodes an IEC temporal literal into device bytes.
fn encode_literal(text: &str) -> Result<Value, MirrorError> {
    let literal = parse_literal(text)
        .ok_or_else(|| MirrorError::InvalidData(format!("malformed literal '{}'", text)))?;
    Ok(json!({
        "literal": text,
        "type": literal.type_name(),
        "hex": hex::encode(literal.to_device_bytes()),
    }))
}
