//! Prometheus counters for register traffic and window accounting

use prometheus::{Encoder, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::error::Result;
use crate::mmio::Provenance;

zenreg_raw::named_enum! {
    /// Kind of mailbox transaction
    pub enum DfOp {
        Read => "read",
        Write => "write",
        BcastRead => "bcast_read",
    }
}

pub struct AccessMetrics {
    registry: Registry,
    df_transactions: IntCounterVec,
    mmio_mapped_bytes: IntGaugeVec,
    mmio_maps: IntCounterVec,
    mmio_leaked_bytes: IntGauge,
}

impl AccessMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let df_transactions = IntCounterVec::new(
            Opts::new(
                "zenreg_df_transactions_total",
                "Data fabric indirect access transactions",
            ),
            &["die", "op"],
        )?;
        let mmio_mapped_bytes = IntGaugeVec::new(
            Opts::new(
                "zenreg_mmio_mapped_bytes",
                "Virtual address space currently backing register windows",
            ),
            &["provenance"],
        )?;
        let mmio_maps = IntCounterVec::new(
            Opts::new("zenreg_mmio_maps_total", "Register windows mapped"),
            &["provenance"],
        )?;
        let mmio_leaked_bytes = IntGauge::new(
            "zenreg_mmio_leaked_bytes",
            "Early-boot windows released after the runtime transition and left mapped",
        )?;

        registry.register(Box::new(df_transactions.clone()))?;
        registry.register(Box::new(mmio_mapped_bytes.clone()))?;
        registry.register(Box::new(mmio_maps.clone()))?;
        registry.register(Box::new(mmio_leaked_bytes.clone()))?;

        Ok(Self {
            registry,
            df_transactions,
            mmio_mapped_bytes,
            mmio_maps,
            mmio_leaked_bytes,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_df(&self, die: u8, op: DfOp) {
        self.df_transactions
            .with_label_values(&[&die.to_string(), op.name()])
            .inc();
    }

    pub fn df_transactions(&self, die: u8, op: DfOp) -> u64 {
        self.df_transactions
            .with_label_values(&[&die.to_string(), op.name()])
            .get()
    }

    pub fn record_map(&self, provenance: Provenance, bytes: usize) {
        self.mmio_maps.with_label_values(&[provenance.name()]).inc();
        self.mmio_mapped_bytes
            .with_label_values(&[provenance.name()])
            .add(bytes as i64);
    }

    pub fn record_unmap(&self, provenance: Provenance, bytes: usize) {
        self.mmio_mapped_bytes
            .with_label_values(&[provenance.name()])
            .sub(bytes as i64);
    }

    /// An early window given up without being torn down: it stops counting
    /// as mapped and starts counting as leaked.
    pub fn record_leak(&self, bytes: usize) {
        self.record_unmap(Provenance::EarlyBoot, bytes);
        self.mmio_leaked_bytes.add(bytes as i64);
    }

    pub fn mapped_bytes(&self, provenance: Provenance) -> i64 {
        self.mmio_mapped_bytes
            .with_label_values(&[provenance.name()])
            .get()
    }

    pub fn leaked_bytes(&self) -> i64 {
        self.mmio_leaked_bytes.get()
    }

    /// Text exposition format
    pub fn encode(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
