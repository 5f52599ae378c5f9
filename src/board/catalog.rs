//! Board table loading and validation.
//!
//! Board support is data, not code: each platform is described by a versioned
//! TOML table that is validated into a [`BoardDescriptor`] at load time.
//! Built-in tables are embedded with `include_str!` and registered through
//! `inventory`; additional boards can be loaded from a directory without
//! touching the routing engine.

use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use strum::IntoEnumIterator;

use super::{
    BankedAioHooks, BoardDescriptor, Capability, DefaultHooks, I2cBusEntry, Pin, PinMapping,
    PlatformHooks, PwmBounds, SpiBusEntry, UartDeviceEntry,
};
use crate::error::{Error, Result};
use crate::tracing::prelude::*;

/// Schema version this loader understands.
const SCHEMA_VERSION: u32 = 1;

/// A built-in board table registered at compile time.
pub struct BoardTable {
    pub name: &'static str,
    pub toml: &'static str,
}

inventory::collect!(BoardTable);

inventory::submit! {
    BoardTable {
        name: "osprey-c1",
        toml: include_str!("../../boards/osprey-c1.toml"),
    }
}

inventory::submit! {
    BoardTable {
        name: "sparrow-x8",
        toml: include_str!("../../boards/sparrow-x8.toml"),
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawBoard {
    schema: u32,
    platform: String,
    /// Platform-id strings (DMI board name, device-tree model) this table
    /// answers for. Prefix match.
    #[serde(rename = "match", default)]
    matches: Vec<String>,
    gpio_count: usize,
    #[serde(default)]
    aio_count: usize,
    #[serde(default)]
    pin: Vec<RawPin>,
    #[serde(default)]
    i2c: Vec<RawI2c>,
    #[serde(default)]
    default_i2c_bus: usize,
    #[serde(default)]
    spi: Vec<RawSpi>,
    #[serde(default)]
    default_spi_bus: usize,
    #[serde(default)]
    uart: Vec<RawUart>,
    #[serde(default)]
    default_uart: usize,
    #[serde(default)]
    pwm: Option<RawPwm>,
    #[serde(default)]
    adc: Option<RawAdc>,
    #[serde(default)]
    hooks: Option<RawHooks>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPin {
    name: String,
    #[serde(default)]
    gpio: Option<RawMapping>,
    #[serde(default)]
    pwm: Option<RawMapping>,
    #[serde(default)]
    fast_gpio: Option<RawMapping>,
    #[serde(default)]
    spi: Option<RawMapping>,
    #[serde(default)]
    i2c: Option<RawMapping>,
    #[serde(default)]
    aio: Option<RawMapping>,
    #[serde(default)]
    uart: Option<RawMapping>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawMapping {
    pinmap: u32,
    #[serde(default)]
    parent: u32,
    #[serde(default)]
    mux: Vec<RawMuxStep>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawMuxStep {
    pin: i32,
    value: u8,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawI2c {
    adapter: u32,
    #[serde(default)]
    sda: Option<i32>,
    #[serde(default)]
    scl: Option<i32>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSpi {
    bus: u32,
    #[serde(default)]
    chip_select: u32,
    #[serde(default)]
    sclk: Option<i32>,
    #[serde(default)]
    mosi: Option<i32>,
    #[serde(default)]
    miso: Option<i32>,
    #[serde(default)]
    cs: Option<i32>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawUart {
    #[serde(default)]
    device: Option<String>,
    #[serde(default)]
    rx: Option<i32>,
    #[serde(default)]
    tx: Option<i32>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPwm {
    min_period_us: u32,
    max_period_us: u32,
    default_period_us: u32,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawAdc {
    raw_bits: u32,
    supported_bits: u32,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawHooks {
    scheme: String,
    #[serde(default)]
    channels_per_device: u32,
}

/// Parse and validate one TOML board table.
pub fn parse_table(text: &str) -> Result<BoardDescriptor> {
    let raw: RawBoard =
        toml::from_str(text).map_err(|e| Error::BoardConfig(format!("parse failure: {e}")))?;
    validate(raw)
}

fn validate(raw: RawBoard) -> Result<BoardDescriptor> {
    let name = raw.platform.clone();
    let fail = |msg: String| Error::BoardConfig(format!("{name}: {msg}"));

    if raw.schema != SCHEMA_VERSION {
        return Err(fail(format!(
            "unsupported schema version {} (expected {SCHEMA_VERSION})",
            raw.schema
        )));
    }

    if raw.pin.len() < raw.gpio_count + raw.aio_count {
        return Err(fail(format!(
            "pin table has {} entries but gpio_count + aio_count = {}",
            raw.pin.len(),
            raw.gpio_count + raw.aio_count
        )));
    }

    let mut pins = Vec::with_capacity(raw.pin.len());
    for (index, raw_pin) in raw.pin.into_iter().enumerate() {
        if raw_pin.fast_gpio.is_some() && raw_pin.gpio.is_none() {
            return Err(fail(format!(
                "pin {index} has fast-gpio without gpio"
            )));
        }
        let mut pin = Pin::invalid(raw_pin.name);
        let families = [
            (Capability::Gpio, raw_pin.gpio),
            (Capability::Pwm, raw_pin.pwm),
            (Capability::FastGpio, raw_pin.fast_gpio),
            (Capability::Spi, raw_pin.spi),
            (Capability::I2c, raw_pin.i2c),
            (Capability::Aio, raw_pin.aio),
            (Capability::Uart, raw_pin.uart),
        ];
        for (cap, mapping) in families {
            if let Some(m) = mapping {
                pin = pin.with_mapping(
                    cap,
                    PinMapping {
                        pinmap: m.pinmap,
                        parent: m.parent,
                        mux: m
                            .mux
                            .iter()
                            .map(|s| super::MuxStep {
                                pin: s.pin,
                                value: s.value,
                            })
                            .collect(),
                    },
                );
            }
        }
        pins.push(pin);
    }

    // Second pass: mux steps must reference in-table pins that can be driven
    // as digital outputs.
    let check_mux_target = |step_pin: i32| -> Result<()> {
        let target = pins
            .get(usize::try_from(step_pin).unwrap_or(usize::MAX))
            .ok_or_else(|| fail(format!("mux step references pin {step_pin} outside the table")))?;
        if !target.supports(Capability::Gpio) {
            return Err(fail(format!(
                "mux step references pin {step_pin} which lacks gpio capability"
            )));
        }
        Ok(())
    };
    for pin in &pins {
        for cap in Capability::iter() {
            if let Some(mapping) = pin.mapping(cap) {
                for step in &mapping.mux {
                    check_mux_target(step.pin)?;
                }
            }
        }
    }

    // Analog window: channel a lives at table index gpio_count + a.
    for channel in 0..raw.aio_count {
        let index = raw.gpio_count + channel;
        if !pins[index].supports(Capability::Aio) {
            return Err(fail(format!(
                "pin {index} is in the analog window but lacks aio capability"
            )));
        }
    }

    let check_signal = |cap: Capability, what: &str, id: Option<i32>| -> Result<()> {
        if let Some(pin_id) = id {
            let pin = pins
                .get(usize::try_from(pin_id).unwrap_or(usize::MAX))
                .ok_or_else(|| fail(format!("{what} pin {pin_id} outside the table")))?;
            if !pin.supports(cap) {
                return Err(fail(format!("{what} pin {pin_id} lacks {cap} capability")));
            }
        }
        Ok(())
    };

    let mut i2c_buses = Vec::with_capacity(raw.i2c.len());
    for (index, bus) in raw.i2c.iter().enumerate() {
        if raw.i2c.iter().take(index).any(|b| b.adapter == bus.adapter) {
            return Err(fail(format!("duplicate i2c adapter {}", bus.adapter)));
        }
        check_signal(Capability::I2c, &format!("i2c bus {index} sda"), bus.sda)?;
        check_signal(Capability::I2c, &format!("i2c bus {index} scl"), bus.scl)?;
        i2c_buses.push(I2cBusEntry {
            adapter: bus.adapter,
            sda: bus.sda,
            scl: bus.scl,
        });
    }
    if !i2c_buses.is_empty() && raw.default_i2c_bus >= i2c_buses.len() {
        return Err(fail(format!(
            "default_i2c_bus {} out of range",
            raw.default_i2c_bus
        )));
    }

    let mut spi_buses = Vec::with_capacity(raw.spi.len());
    for (index, bus) in raw.spi.iter().enumerate() {
        if raw
            .spi
            .iter()
            .take(index)
            .any(|b| b.bus == bus.bus && b.chip_select == bus.chip_select)
        {
            return Err(fail(format!(
                "duplicate spi bus {}.{}",
                bus.bus, bus.chip_select
            )));
        }
        for (what, id) in [
            ("sclk", bus.sclk),
            ("mosi", bus.mosi),
            ("miso", bus.miso),
            ("cs", bus.cs),
        ] {
            check_signal(Capability::Spi, &format!("spi bus {index} {what}"), id)?;
        }
        spi_buses.push(SpiBusEntry {
            bus: bus.bus,
            chip_select: bus.chip_select,
            sclk: bus.sclk,
            mosi: bus.mosi,
            miso: bus.miso,
            cs: bus.cs,
        });
    }
    if !spi_buses.is_empty() && raw.default_spi_bus >= spi_buses.len() {
        return Err(fail(format!(
            "default_spi_bus {} out of range",
            raw.default_spi_bus
        )));
    }

    let mut uart_devices = Vec::with_capacity(raw.uart.len());
    for (index, uart) in raw.uart.iter().enumerate() {
        if let Some(device) = &uart.device {
            if raw
                .uart
                .iter()
                .take(index)
                .any(|u| u.device.as_deref() == Some(device.as_str()))
            {
                return Err(fail(format!("duplicate uart device {device}")));
            }
        }
        check_signal(Capability::Uart, &format!("uart {index} rx"), uart.rx)?;
        check_signal(Capability::Uart, &format!("uart {index} tx"), uart.tx)?;
        uart_devices.push(UartDeviceEntry {
            device: uart.device.as_ref().map(Into::into),
            rx: uart.rx,
            tx: uart.tx,
        });
    }
    if !uart_devices.is_empty() && raw.default_uart >= uart_devices.len() {
        return Err(fail(format!("default_uart {} out of range", raw.default_uart)));
    }

    let pwm_bounds = match raw.pwm {
        Some(p) => {
            if p.min_period_us > p.max_period_us
                || p.default_period_us < p.min_period_us
                || p.default_period_us > p.max_period_us
            {
                return Err(fail("pwm period bounds are inconsistent".to_string()));
            }
            PwmBounds {
                min_period_us: p.min_period_us,
                max_period_us: p.max_period_us,
                default_period_us: p.default_period_us,
            }
        }
        None => PwmBounds::default(),
    };

    if raw.aio_count > 0 && raw.adc.is_none() {
        return Err(fail("analog channels declared without an [adc] section".to_string()));
    }
    let (adc_raw_bits, adc_supported_bits) = match raw.adc {
        Some(adc) => {
            // Full-scale values and normalization shifts are computed in
            // u32; a bit count above 31 overflows them.
            if adc.raw_bits == 0 || adc.raw_bits > 31 {
                return Err(fail(format!(
                    "adc raw_bits {} must be 1..=31",
                    adc.raw_bits
                )));
            }
            if adc.supported_bits == 0 || adc.supported_bits > adc.raw_bits {
                return Err(fail(format!(
                    "adc supported_bits {} must be 1..={}",
                    adc.supported_bits, adc.raw_bits
                )));
            }
            (adc.raw_bits, adc.supported_bits)
        }
        None => (0, 0),
    };

    let hooks: Arc<dyn PlatformHooks> = match &raw.hooks {
        None => Arc::new(DefaultHooks),
        Some(h) if h.scheme == "default" => Arc::new(DefaultHooks),
        Some(h) if h.scheme == "banked-aio" => {
            if h.channels_per_device == 0 {
                return Err(fail(
                    "banked-aio hooks require channels_per_device > 0".to_string(),
                ));
            }
            Arc::new(BankedAioHooks {
                channels_per_device: h.channels_per_device,
            })
        }
        Some(h) => return Err(fail(format!("unknown hook scheme \"{}\"", h.scheme))),
    };

    debug!(
        platform = %name,
        pins = pins.len(),
        i2c = i2c_buses.len(),
        spi = spi_buses.len(),
        uart = uart_devices.len(),
        "board table validated"
    );

    Ok(BoardDescriptor {
        platform_name: raw.platform,
        pins,
        gpio_count: raw.gpio_count,
        aio_count: raw.aio_count,
        i2c_buses,
        default_i2c_bus: raw.default_i2c_bus,
        spi_buses,
        default_spi_bus: raw.default_spi_bus,
        uart_devices,
        default_uart: raw.default_uart,
        pwm_bounds,
        adc_raw_bits,
        adc_supported_bits,
        hooks,
    })
}

fn raw_matches(raw: &RawBoard, platform_id: &str) -> bool {
    raw.matches.iter().any(|m| platform_id.starts_with(m.as_str()))
}

/// Find a built-in table whose match list covers `platform_id`.
pub fn find_builtin(platform_id: &str) -> Result<Option<BoardDescriptor>> {
    for table in inventory::iter::<BoardTable>() {
        let raw: RawBoard = toml::from_str(table.toml).map_err(|e| {
            Error::BoardConfig(format!("built-in table {}: parse failure: {e}", table.name))
        })?;
        if raw_matches(&raw, platform_id) {
            debug!(table = table.name, platform_id, "matched built-in board table");
            return validate(raw).map(Some);
        }
    }
    Ok(None)
}

/// Find a table in a directory of external `.toml` board files.
///
/// Files that fail to parse are skipped with a warning so one bad table does
/// not mask the rest of the directory.
pub fn find_in_dir(dir: &Path, platform_id: &str) -> Result<Option<BoardDescriptor>> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| Error::BoardConfig(format!("cannot read table dir {}: {e}", dir.display())))?;
    let mut paths: Vec<_> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "toml"))
        .collect();
    paths.sort();

    for path in paths {
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) => {
                warn!(path = %path.display(), %err, "skipping unreadable board table");
                continue;
            }
        };
        let raw: RawBoard = match toml::from_str(&text) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(path = %path.display(), %err, "skipping malformed board table");
                continue;
            }
        };
        if raw_matches(&raw, platform_id) {
            debug!(path = %path.display(), platform_id, "matched external board table");
            return validate(raw).map(Some);
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        schema = 1
        platform = "test-board"
        match = ["Test Board"]
        gpio_count = 2

        [[pin]]
        name = "P0"
        gpio = { pinmap = 10 }

        [[pin]]
        name = "P1"
        gpio = { pinmap = 11 }
    "#;

    #[test]
    fn test_minimal_table_parses() {
        let board = parse_table(MINIMAL).unwrap();
        assert_eq!(board.platform_name, "test-board");
        assert_eq!(board.pin_count(), 2);
        assert!(board.pin(1).unwrap().supports(Capability::Gpio));
        assert_eq!(board.adc_raw_bits, 0);
    }

    #[test]
    fn test_rejects_wrong_schema() {
        let err = parse_table(&MINIMAL.replace("schema = 1", "schema = 2")).unwrap_err();
        assert!(matches!(err, Error::BoardConfig(_)), "{err}");
    }

    #[test]
    fn test_rejects_short_pin_table() {
        let err = parse_table(&MINIMAL.replace("gpio_count = 2", "gpio_count = 3")).unwrap_err();
        assert!(matches!(err, Error::BoardConfig(_)), "{err}");
    }

    #[test]
    fn test_rejects_duplicate_i2c_adapter() {
        let table = format!(
            "{MINIMAL}\n[[i2c]]\nadapter = 0\n\n[[i2c]]\nadapter = 0\n"
        );
        let err = parse_table(&table).unwrap_err();
        assert!(err.to_string().contains("duplicate i2c adapter"), "{err}");
    }

    #[test]
    fn test_rejects_mux_reference_outside_table() {
        let table = MINIMAL.replace("gpio = { pinmap = 11 }", "gpio = { pinmap = 11, mux = [{ pin = 9, value = 1 }] }");
        let err = parse_table(&table).unwrap_err();
        assert!(err.to_string().contains("outside the table"), "{err}");
    }

    #[test]
    fn test_rejects_fast_gpio_without_gpio() {
        let table = MINIMAL.replace(
            "gpio = { pinmap = 11 }",
            "fast_gpio = { pinmap = 11 }",
        );
        let err = parse_table(&table).unwrap_err();
        assert!(err.to_string().contains("fast-gpio without gpio"), "{err}");
    }

    #[test]
    fn test_rejects_adc_raw_bits_out_of_range() {
        for raw_bits in [0, 32, 64] {
            let table = format!(
                "{MINIMAL}\n[adc]\nraw_bits = {raw_bits}\nsupported_bits = 10\n"
            );
            let err = parse_table(&table).unwrap_err();
            assert!(err.to_string().contains("raw_bits"), "{err}");
        }
        let table = format!("{MINIMAL}\n[adc]\nraw_bits = 31\nsupported_bits = 10\n");
        assert_eq!(parse_table(&table).unwrap().adc_raw_bits, 31);
    }

    #[test]
    fn test_rejects_unknown_hook_scheme() {
        let table = format!("{MINIMAL}\n[hooks]\nscheme = \"quantum\"\n");
        let err = parse_table(&table).unwrap_err();
        assert!(err.to_string().contains("unknown hook scheme"), "{err}");
    }

    #[test]
    fn test_builtin_tables_validate() {
        for table in inventory::iter::<BoardTable>() {
            parse_table(table.toml)
                .unwrap_or_else(|e| panic!("built-in table {} invalid: {e}", table.name));
        }
    }

    #[test]
    fn test_find_builtin_by_match_string() {
        let board = find_builtin("Osprey C1 rev2").unwrap().unwrap();
        assert_eq!(board.platform_name, "osprey-c1");
        assert!(find_builtin("Unknown Widget").unwrap().is_none());
    }

    #[test]
    fn test_find_in_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("custom.toml"), MINIMAL).unwrap();
        std::fs::write(dir.path().join("broken.toml"), "schema = ").unwrap();

        let board = find_in_dir(dir.path(), "Test Board v3").unwrap().unwrap();
        assert_eq!(board.platform_name, "test-board");
        assert!(find_in_dir(dir.path(), "Other").unwrap().is_none());
    }
}
