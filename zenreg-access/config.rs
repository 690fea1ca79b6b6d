use std::path::Path;
use std::sync::Arc;

use zenreg_raw::df::{DF_FIRST_DEVICE, DF_FUNC_COUNT, DF_MAX_NODES};
use zenreg_raw::{DfRev, Microarch};

use crate::common::pci::{ConfigSpace, PciAddress, PciHandle, ProcPci, AMD_VENDOR_ID};
use crate::common::CPU_ARCH;
use crate::df::{DfNode, IoDie};
use crate::error::{Result, ZenregError};
use crate::telemetry::AccessMetrics;

/// Which platform we are addressing and which I/O dies to build handles for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformConfig {
    /// `None` when the fabric revision is known but no register tables are
    pub microarch: Option<Microarch>,
    pub df_rev: DfRev,
    pub dies: Vec<u8>,
}

impl PlatformConfig {
    pub fn new(microarch: Microarch, dies: Vec<u8>) -> Self {
        Self {
            microarch: Some(microarch),
            df_rev: microarch.df_rev(),
            dies,
        }
    }

    /// Detect the microarchitecture from CPUID and the dies from procfs
    pub fn auto_detect() -> Result<Self> {
        let cpu = *CPU_ARCH;
        if cpu.df_rev == DfRev::Unknown {
            return Err(ZenregError::UnsupportedArchitecture(format!(
                "family {:X} model {:X}",
                cpu.family, cpu.model
            )));
        }

        let root = ProcPci::root_from_env();
        let dies = Self::probe_df_nodes(&root)?;
        if dies.is_empty() {
            return Err(ZenregError::ConfigError(format!(
                "no AMD data fabric nodes under {}",
                root.display()
            )));
        }

        tracing::info!(
            "Auto-detected {} I/O dies ({})",
            dies.len(),
            cpu.df_rev.name()
        );

        Ok(Self {
            microarch: cpu.microarch,
            df_rev: cpu.df_rev,
            dies,
        })
    }

    /// Find fabric nodes by reading function 0 of 00:18 onwards. Nodes are
    /// numbered contiguously, so probing stops at the first gap.
    pub fn probe_df_nodes(root: &Path) -> Result<Vec<u8>> {
        let mut dies = Vec::new();
        for die in 0..DF_MAX_NODES {
            let address = PciAddress::new(0, DF_FIRST_DEVICE + die, 0);
            let Ok(handle) = PciHandle::open(root, address) else {
                break;
            };
            let (vendor, device) = handle.ids()?;
            if vendor != AMD_VENDOR_ID {
                tracing::warn!("{address} is {vendor:04x}:{device:04x}, not an AMD fabric node");
                break;
            }
            tracing::debug!("Fabric node {address}: {vendor:04x}:{device:04x}");
            dies.push(die);
        }
        Ok(dies)
    }

    /// Build one handle per configured die over `cfg`.
    #[track_caller]
    pub fn open_dies(
        &self,
        cfg: Arc<dyn ConfigSpace>,
        metrics: Option<Arc<AccessMetrics>>,
    ) -> Vec<IoDie> {
        self.dies
            .iter()
            .map(|&die| {
                let handle = IoDie::new(die, DfNode::for_die(die, self.df_rev), Arc::clone(&cfg));
                match &metrics {
                    Some(metrics) => handle.with_metrics(Arc::clone(metrics)),
                    None => handle,
                }
            })
            .collect()
    }

    /// Open every fabric function of the configured dies through procfs and
    /// build their handles.
    pub fn open_proc_dies(&self, metrics: Option<Arc<AccessMetrics>>) -> Result<Vec<IoDie>> {
        let pci = ProcPci::new();
        for &die in &self.dies {
            pci.open_node(0, DF_FIRST_DEVICE + die, DF_FUNC_COUNT)?;
        }
        Ok(self.open_dies(Arc::new(pci), metrics))
    }
}

/// Parse a die list like "0-1,3" into sorted, unique die numbers
pub fn parse_die_list(s: &str) -> Result<Vec<u8>> {
    let mut dies = Vec::new();
    for part in s.trim().split(',') {
        let part = part.trim();
        if let Some((start, end)) = part.split_once('-') {
            let start = parse_die(start)?;
            let end = parse_die(end)?;
            if start > end {
                return Err(ZenregError::ParseError(format!("empty die range {part}")));
            }
            dies.extend(start..=end);
        } else {
            dies.push(parse_die(part)?);
        }
    }
    dies.sort_unstable();
    dies.dedup();
    Ok(dies)
}

fn parse_die(s: &str) -> Result<u8> {
    let die: u8 = s
        .trim()
        .parse()
        .map_err(|e| ZenregError::ParseError(format!("die {s:?}: {e}")))?;
    if die >= DF_MAX_NODES {
        return Err(ZenregError::ParseError(format!(
            "die {die} >= {DF_MAX_NODES}"
        )));
    }
    Ok(die)
}

/// Parse a decimal or `0x`-prefixed hexadecimal number
pub fn parse_number(s: &str) -> Result<u64> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(&hex.replace('_', ""), 16),
        None => s.replace('_', "").parse(),
    };
    parsed.map_err(|e| ZenregError::ParseError(format!("number {s:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::pci::test_support::*;
    use crate::sim::SimFabric;

    #[test]
    fn test_parse_die_list() {
        assert_eq!(parse_die_list("0").unwrap(), vec![0]);
        assert_eq!(parse_die_list("0-3").unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(parse_die_list("3, 0-1,1").unwrap(), vec![0, 1, 3]);
        assert!(parse_die_list("8").is_err());
        assert!(parse_die_list("2-1").is_err());
        assert!(parse_die_list("a").is_err());
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("0x5c").unwrap(), 0x5c);
        assert_eq!(parse_number("0X1124_0294").unwrap(), 0x1124_0294);
        assert_eq!(parse_number("200").unwrap(), 200);
        assert!(parse_number("0xzz").is_err());
    }

    #[test]
    fn test_new_takes_revision_from_microarch() {
        let config = PlatformConfig::new(Microarch::Genoa, vec![0]);
        assert_eq!(config.df_rev, DfRev::V4);
        assert_eq!(config.microarch, Some(Microarch::Genoa));
    }

    #[test]
    fn test_probe_stops_at_first_gap() {
        let root = scratch_root("probe");
        fake_function(&root, PciAddress::new(0, 0x18, 0), AMD_VENDOR_ID, 0x14ad);
        fake_function(&root, PciAddress::new(0, 0x19, 0), AMD_VENDOR_ID, 0x14ad);
        fake_function(&root, PciAddress::new(0, 0x1b, 0), AMD_VENDOR_ID, 0x14ad);

        assert_eq!(PlatformConfig::probe_df_nodes(&root).unwrap(), vec![0, 1]);
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn test_probe_rejects_foreign_vendor() {
        let root = scratch_root("probe-vendor");
        fake_function(&root, PciAddress::new(0, 0x18, 0), 0x8086, 0x2020);

        assert!(PlatformConfig::probe_df_nodes(&root).unwrap().is_empty());
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn test_open_dies_over_config_space() {
        let fabric = Arc::new(SimFabric::new(DfRev::V3p5, 2, 16));
        let metrics = Arc::new(AccessMetrics::new().unwrap());
        let config = PlatformConfig::new(Microarch::Milan, vec![0, 1]);

        let dies = config.open_dies(fabric.clone(), Some(metrics.clone()));
        assert_eq!(dies.len(), 2);
        assert_eq!(dies[1].index(), 1);
        assert_eq!(dies[1].node().device, 0x19);
        assert_eq!(dies[1].instance_count(), 16);

        dies[0].df_bcast_read32(&zenreg_raw::df::DF_FBIINFO0);
        assert_eq!(metrics.df_transactions(0, crate::telemetry::DfOp::BcastRead), 1);
    }
}
