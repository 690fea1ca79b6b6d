use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use zenreg::common::mech1::{MECH1_EXT_MAX_REG, MECH1_MAX_REG};
use zenreg::common::{Mech1, PortIo, X86Ports, CPU_ARCH};
use zenreg::config::{parse_die_list, parse_number, PlatformConfig};
use zenreg::df::{df_early_read32, df_read32, IoDie};
use zenreg::mmio::{reg_read, DevMemArena, DeviceArena, EarlyVm, MmioMapper};
use zenreg::sim::{SimArena, SimEarlyVm, SimFabric, SimPorts};
use zenreg::{AccessMetrics, Result, ZenregError};
use zenreg_raw::arch::fch;
use zenreg_raw::df::{DF_FUNC_COUNT, DF_MAX_NODES};
use zenreg_raw::{
    check_location, resolve, DfRegDef, DfRev, DfRevSet, Microarch, MmioPhys, RegDef, RegWidth,
    RegisterLocation, RegisterUnit,
};

/// Component instances modelled per die under --simulate
const SIM_INSTANCES: u8 = 32;

#[derive(Parser, Debug)]
#[command(name = "zenreg")]
#[command(about = "Register addressing and access for AMD Zen SoCs")]
struct Args {
    #[arg(
        short,
        long,
        global = true,
        help = "Enable verbose logging (shows every config space, mailbox and MMIO access)"
    )]
    verbose: bool,

    #[arg(long, global = true, help = "Print results as JSON")]
    json: bool,

    #[arg(
        long,
        global = true,
        help = "Run against in-memory models of the fabric and mapping services"
    )]
    simulate: bool,

    #[arg(
        long,
        global = true,
        help = "Microarchitecture (milan, genoa); detected from CPUID when omitted"
    )]
    microarch: Option<String>,

    #[arg(
        long = "die",
        global = true,
        help = "I/O dies to use (supports ranges and comma-separated lists: --die 0-1 or --die 0 --die 1)",
        action = clap::ArgAction::Append
    )]
    dies: Vec<String>,

    #[arg(long, global = true, help = "Print Prometheus metrics after the command")]
    metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List SMN-addressed units and their apertures
    Units,

    /// Resolve a register descriptor to its SMN address
    Resolve {
        /// Unit name, as printed by `units`
        unit: String,
        #[arg(long, default_value_t = 0)]
        unit_no: u8,
        #[arg(long)]
        sub: Option<u8>,
        #[arg(long, value_parser = parse_u32)]
        offset: u32,
        #[arg(long, default_value_t = 0, help = "Access width in bytes (0 = 4)")]
        size: u8,
        #[arg(long, value_parser = parse_u32, default_value = "0")]
        stride: u32,
        #[arg(long, default_value_t = 0)]
        count: u32,
        #[arg(long, default_value_t = 0)]
        instance: u16,
    },

    /// Read a data fabric register on one component instance of each die
    DfRead {
        #[arg(long)]
        func: u8,
        #[arg(long, value_parser = parse_u16)]
        reg: u16,
        #[arg(long, conflicts_with = "bcast", required_unless_present = "bcast")]
        inst: Option<u8>,
        #[arg(long)]
        bcast: bool,
    },

    /// Read a direct data fabric register from the first node over port I/O
    DfEarlyRead {
        #[arg(long)]
        func: u8,
        #[arg(long, value_parser = parse_u16)]
        reg: u16,
        #[arg(
            long,
            help = "Use AMD's extended CF8 register number to reach offsets above 0xff"
        )]
        extended: bool,
    },

    /// Read an FCH register through a mapped MMIO window
    MmioRead {
        #[arg(value_enum)]
        block: FchBlock,
        #[arg(long, default_value_t = 0, help = "I2C controller number")]
        controller: u8,
        #[arg(long, value_parser = parse_u32)]
        offset: u32,
        #[arg(long, default_value_t = 4)]
        size: u8,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum FchBlock {
    I2c,
    Iomux,
}

fn parse_u32(s: &str) -> std::result::Result<u32, String> {
    let value = parse_number(s).map_err(|e| e.to_string())?;
    u32::try_from(value).map_err(|_| format!("{s} does not fit 32 bits"))
}

fn parse_u16(s: &str) -> std::result::Result<u16, String> {
    let value = parse_number(s).map_err(|e| e.to_string())?;
    u16::try_from(value).map_err(|_| format!("{s} does not fit 16 bits"))
}

#[derive(Serialize)]
struct UnitRow {
    unit: &'static str,
    unit_no: u8,
    sub_unit: Option<u8>,
    aperture: u32,
}

impl fmt::Display for UnitRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sub = self.sub_unit.map(|s| format!(".{s}")).unwrap_or_default();
        write!(
            f,
            "{:<10} {:>2}{:<3} 0x{:08x}",
            self.unit, self.unit_no, sub, self.aperture
        )
    }
}

#[derive(Serialize)]
struct ResolvedReg {
    unit: &'static str,
    unit_no: u8,
    sub_unit: Option<u8>,
    instance: u16,
    smn_addr: u32,
    width: u32,
}

impl fmt::Display for ResolvedReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} instance {}: SMN 0x{:08x} ({} bytes)",
            self.unit, self.unit_no, self.instance, self.smn_addr, self.width
        )
    }
}

#[derive(Serialize)]
struct DfValue {
    die: u8,
    func: u8,
    reg: u16,
    instance: Option<u8>,
    value: u32,
}

impl fmt::Display for DfValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let target = match self.instance {
            Some(inst) => format!("instance {inst}"),
            None => "broadcast".to_string(),
        };
        write!(
            f,
            "die {} F{}x{:03x} {}: 0x{:08x}",
            self.die, self.func, self.reg, target, self.value
        )
    }
}

#[derive(Serialize)]
struct MmioValue {
    unit: &'static str,
    phys_addr: u64,
    width: u32,
    value: u64,
}

impl fmt::Display for MmioValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} 0x{:x} ({} bytes): 0x{:x}",
            self.unit, self.phys_addr, self.width, self.value
        )
    }
}

fn emit<T: Serialize + fmt::Display>(json: bool, rows: &[T]) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(rows)?);
    } else {
        for row in rows {
            println!("{row}");
        }
    }
    Ok(())
}

fn microarch(args: &Args) -> Result<Microarch> {
    match &args.microarch {
        Some(name) => Microarch::from_name(name)
            .ok_or_else(|| ZenregError::ParseError(format!("unknown microarchitecture {name:?}"))),
        None => CPU_ARCH.microarch.ok_or_else(|| {
            ZenregError::UnsupportedArchitecture(format!(
                "family {:X} model {:X}; pass --microarch",
                CPU_ARCH.family, CPU_ARCH.model
            ))
        }),
    }
}

fn platform(args: &Args) -> Result<PlatformConfig> {
    let dies = if args.dies.is_empty() {
        None
    } else {
        Some(parse_die_list(&args.dies.join(","))?)
    };

    if args.simulate || args.microarch.is_some() {
        return Ok(PlatformConfig::new(
            microarch(args)?,
            dies.unwrap_or_else(|| vec![0]),
        ));
    }

    tracing::info!("Auto-detecting platform...");
    let mut config = PlatformConfig::auto_detect()?;
    if let Some(dies) = dies {
        config.dies = dies;
    }
    Ok(config)
}

fn simulated_fabric(config: &PlatformConfig) -> Arc<SimFabric> {
    let nodes = config.dies.iter().max().map_or(1, |&die| die + 1);
    Arc::new(SimFabric::new(config.df_rev, nodes.min(DF_MAX_NODES), SIM_INSTANCES))
}

fn list_units(args: &Args) -> Result<Vec<UnitRow>> {
    let arch = microarch(args)?;
    let mut rows = Vec::new();
    for family in arch.smn_families() {
        for unit_no in 0..family.unit_count {
            if family.has_sub_units() {
                for sub in 0..family.sub_count {
                    rows.push(UnitRow {
                        unit: family.unit.name(),
                        unit_no,
                        sub_unit: Some(sub),
                        aperture: family.aperture(unit_no, Some(sub)),
                    });
                }
            } else {
                rows.push(UnitRow {
                    unit: family.unit.name(),
                    unit_no,
                    sub_unit: None,
                    aperture: family.aperture(unit_no, None),
                });
            }
        }
    }
    Ok(rows)
}

#[allow(clippy::too_many_arguments)]
fn resolve_reg(
    args: &Args,
    unit: &str,
    unit_no: u8,
    sub: Option<u8>,
    offset: u32,
    size: u8,
    stride: u32,
    count: u32,
    instance: u16,
) -> Result<ResolvedReg> {
    let arch = microarch(args)?;
    let unit = RegisterUnit::from_name(unit)
        .ok_or_else(|| ZenregError::ParseError(format!("unknown unit {unit:?}")))?;
    let family = arch.smn_family(unit).ok_or_else(|| {
        ZenregError::ConfigError(format!("{unit} is not SMN-addressed on {arch}"))
    })?;

    let def = RegDef::new(unit, offset)
        .with_size(size)
        .with_stride(stride)
        .with_count(count);
    let mut loc = RegisterLocation::unit(unit_no).with_instance(instance);
    if let Some(sub) = sub {
        loc = loc.with_sub_unit(sub);
    }
    check_location(family, &def, loc).map_err(|e| {
        ZenregError::ConfigError(format!("{unit} register 0x{offset:x} on {arch}: {e}"))
    })?;

    let reg = resolve(family, &def, loc);
    Ok(ResolvedReg {
        unit: unit.name(),
        unit_no,
        sub_unit: sub,
        instance,
        smn_addr: reg.addr(),
        width: reg.width().bytes(),
    })
}

/// Build a descriptor from user input, refusing anything `max_reg` or the
/// register shape would turn into a fatal error later.
fn df_def(func: u8, reg: u16, max_reg: u16) -> Result<DfRegDef> {
    if func >= DF_FUNC_COUNT || reg % 4 != 0 {
        return Err(ZenregError::ConfigError(format!(
            "F{func}x{reg:03x} is not a data fabric register"
        )));
    }
    if reg > max_reg {
        return Err(ZenregError::ConfigError(format!(
            "F{func}x{reg:03x} is past 0x{max_reg:x}, the highest register reachable this way"
        )));
    }
    Ok(DfRegDef::new(DfRevSet::ALL, func, reg))
}

/// Highest register the fabric mailbox of `rev` can address
fn indirect_reg_limit(rev: DfRev) -> Result<u16> {
    rev.indirect_reg_limit().ok_or_else(|| {
        ZenregError::UnsupportedArchitecture(format!("no fabric mailbox for {}", rev.name()))
    })
}

fn df_read_all(dies: &[IoDie], def: &DfRegDef, inst: Option<u8>) -> Vec<DfValue> {
    dies.iter()
        .map(|die| DfValue {
            die: die.index(),
            func: def.func,
            reg: def.reg,
            instance: inst,
            value: match inst {
                Some(inst) => df_read32(die, inst, def),
                None => die.df_bcast_read32(def),
            },
        })
        .collect()
}

fn mech1<P: PortIo>(ports: P, extended: bool) -> Mech1<P> {
    if extended {
        Mech1::with_extended_config(ports)
    } else {
        Mech1::new(ports)
    }
}

fn df_early_read<P: PortIo>(mech1: &Mech1<P>, def: &DfRegDef) -> Vec<DfValue> {
    vec![DfValue {
        die: 0,
        func: def.func,
        reg: def.reg,
        instance: None,
        value: df_early_read32(mech1, def),
    }]
}

fn mmio_read<E: EarlyVm, A: DeviceArena>(
    mapper: &MmioMapper<E, A>,
    unit: RegisterUnit,
    phys: MmioPhys,
    offset: u32,
    size: u8,
) -> Result<MmioValue> {
    let width = RegWidth::from_bytes(size as u32);
    if offset % width.bytes() != 0 {
        return Err(ZenregError::ConfigError(format!(
            "offset 0x{offset:x} is not {size}-byte aligned"
        )));
    }
    if offset as u64 + width.bytes() as u64 > phys.len {
        return Err(ZenregError::ConfigError(format!(
            "offset 0x{offset:x} is outside the 0x{:x}-byte {unit} window",
            phys.len
        )));
    }

    let block = mapper.map(unit, phys);
    let def = RegDef::new(unit, offset).with_size(size);
    let reg = block.reg(&def, 0);
    let row = MmioValue {
        unit: unit.name(),
        phys_addr: reg.phys_addr(),
        width: width.bytes(),
        value: reg_read(&reg),
    };
    mapper.unmap(block);
    Ok(row)
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logging based on verbose flag; RUST_LOG takes precedence
    let log_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let metrics = if args.metrics {
        Some(Arc::new(AccessMetrics::new()?))
    } else {
        None
    };

    match args.command {
        Command::Units => emit(args.json, &list_units(&args)?)?,

        Command::Resolve {
            ref unit,
            unit_no,
            sub,
            offset,
            size,
            stride,
            count,
            instance,
        } => {
            let row = resolve_reg(
                &args, unit, unit_no, sub, offset, size, stride, count, instance,
            )?;
            emit(args.json, &[row])?
        }

        Command::DfRead { func, reg, inst, .. } => {
            let config = platform(&args)?;
            let def = df_def(func, reg, indirect_reg_limit(config.df_rev)?)?;
            let dies = if args.simulate {
                config.open_dies(simulated_fabric(&config), metrics.clone())
            } else {
                config.open_proc_dies(metrics.clone())?
            };
            emit(args.json, &df_read_all(&dies, &def, inst))?
        }

        Command::DfEarlyRead {
            func,
            reg,
            extended,
        } => {
            let max_reg = if extended {
                MECH1_EXT_MAX_REG
            } else {
                MECH1_MAX_REG
            };
            let def = df_def(func, reg, max_reg)?;
            let rows = if args.simulate {
                let config = platform(&args)?;
                df_early_read(&mech1(SimPorts::new(simulated_fabric(&config)), extended), &def)
            } else {
                df_early_read(&mech1(X86Ports::acquire()?, extended), &def)
            };
            emit(args.json, &rows)?
        }

        Command::MmioRead {
            block,
            controller,
            offset,
            size,
        } => {
            let (unit, phys) = match block {
                FchBlock::I2c => {
                    if controller as usize >= fch::I2C_COUNT {
                        return Err(ZenregError::ConfigError(format!(
                            "I2C controller {controller} >= {}",
                            fch::I2C_COUNT
                        )));
                    }
                    (RegisterUnit::FchI2c, fch::i2c_mmio_block(controller))
                }
                FchBlock::Iomux => (RegisterUnit::FchIomux, fch::iomux_mmio_block()),
            };
            if !matches!(size, 1 | 2 | 4 | 8) {
                return Err(ZenregError::ConfigError(format!(
                    "access size {size} is not 1, 2, 4 or 8"
                )));
            }

            let row = if args.simulate {
                let mut mapper = MmioMapper::new(SimEarlyVm::new(), SimArena::new());
                if let Some(metrics) = &metrics {
                    mapper = mapper.with_metrics(Arc::clone(metrics));
                }
                mapper.enter_runtime();
                mmio_read(&mapper, unit, phys, offset, size)?
            } else {
                let mut mapper = MmioMapper::runtime_only(DevMemArena::open()?);
                if let Some(metrics) = &metrics {
                    mapper = mapper.with_metrics(Arc::clone(metrics));
                }
                mmio_read(&mapper, unit, phys, offset, size)?
            };
            emit(args.json, &[row])?
        }
    }

    if let Some(metrics) = metrics {
        print!("{}", metrics.encode()?);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(argv: &[&str]) -> Args {
        Args::parse_from(std::iter::once("zenreg").chain(argv.iter().copied()))
    }

    #[test]
    #[cfg(feature = "genoa")]
    fn test_resolve_refuses_bad_locations() {
        let args = args(&["--microarch", "genoa", "units"]);
        let pcie_core = |unit_no, sub, offset, size| {
            resolve_reg(&args, "pcie_core", unit_no, sub, offset, size, 0, 0, 0)
        };

        assert!(pcie_core(1, Some(1), 0x294, 0).is_ok());
        for bad in [
            pcie_core(1, Some(2), 0x294, 0),
            pcie_core(1, None, 0x294, 0),
            pcie_core(4, Some(0), 0x294, 0),
            pcie_core(0, Some(0), 0x8_0000, 0),
            pcie_core(0, Some(0), 0x7_fffc, 8),
            pcie_core(0, Some(0), 0x294, 3),
        ] {
            assert!(matches!(bad, Err(ZenregError::ConfigError(_))));
        }
        assert!(matches!(
            resolve_reg(&args, "ioapic", 0, None, 0x40, 0, 0, 22, 22),
            Err(ZenregError::ConfigError(_))
        ));
    }

    #[test]
    fn test_df_def_refuses_registers_past_the_mailbox() {
        let v3 = indirect_reg_limit(DfRev::V3).unwrap();
        assert!(df_def(0, 0x7fc, v3).is_ok());
        assert!(matches!(df_def(0, 0x800, v3), Err(ZenregError::ConfigError(_))));
        assert!(df_def(0, 0x800, indirect_reg_limit(DfRev::V4).unwrap()).is_ok());
        assert!(df_def(8, 0x40, v3).is_err());
        assert!(df_def(0, 0x42, v3).is_err());
        assert!(indirect_reg_limit(DfRev::Unknown).is_err());
    }

    #[test]
    fn test_early_read_limit_follows_encoding() {
        assert!(matches!(
            df_def(4, 0x180, MECH1_MAX_REG),
            Err(ZenregError::ConfigError(_))
        ));

        let def = df_def(4, 0x180, MECH1_EXT_MAX_REG).unwrap();
        let fabric = Arc::new(SimFabric::new(DfRev::V4, 1, 4));
        let rows = df_early_read(&mech1(SimPorts::new(fabric), true), &def);
        assert_eq!((rows[0].func, rows[0].reg, rows[0].value), (4, 0x180, 0));
    }
}
