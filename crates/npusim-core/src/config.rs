//! Hardware configuration
//!
//! A [`SimulationConfig`] is built once from a JSON document and then shared
//! read-only by every operator. Enumerated fields are checked against closed
//! sets; optional fields keep their defaults when absent.

use crate::error::ConfigError;
use npusim_isa::Addr;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::Path;

/// DRAM request granularity used when the document does not set one
pub const DEFAULT_DRAM_REQ_SIZE: u32 = 32;

type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Systolic array dataflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CoreType {
    #[serde(rename = "systolic_os")]
    SystolicOs,
    #[serde(rename = "systolic_ws")]
    SystolicWs,
}

/// DRAM timing model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DramType {
    #[serde(rename = "simple")]
    Simple,
    #[serde(rename = "ramulator")]
    Ramulator,
}

/// Interconnect timing model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IcntType {
    #[serde(rename = "simple")]
    Simple,
    #[serde(rename = "booksim2")]
    Booksim2,
}

/// Activation memory layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Layout {
    #[default]
    #[serde(rename = "NCHW")]
    Nchw,
    #[serde(rename = "NHWC")]
    Nhwc,
}

macro_rules! config_names {
    ($ty:ident, $field:literal, { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            /// Name used in configuration documents
            pub const fn config_name(self) -> &'static str {
                match self {
                    $($ty::$variant => $name),+
                }
            }

            fn parse(value: &str) -> ConfigResult<Self> {
                match value {
                    $($name => Ok($ty::$variant),)+
                    other => Err(ConfigError::UnknownVariant {
                        field: $field,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.config_name())
            }
        }
    };
}

config_names!(CoreType, "core_type", { SystolicOs => "systolic_os", SystolicWs => "systolic_ws" });
config_names!(DramType, "dram_type", { Simple => "simple", Ramulator => "ramulator" });
config_names!(IcntType, "icnt_type", { Simple => "simple", Booksim2 => "booksim2" });
config_names!(Layout, "layout", { Nchw => "NCHW", Nhwc => "NHWC" });

/// Immutable description of the simulated accelerator
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SimulationConfig {
    // Core
    pub num_cores: u32,
    pub core_type: CoreType,
    pub core_freq: u32,
    pub core_width: u32,
    pub core_height: u32,

    // Vector unit
    pub vector_process_bit: u32,
    pub add_latency: u32,
    pub mul_latency: u32,
    pub exp_latency: u32,
    pub gelu_latency: u32,
    pub add_tree_latency: u32,
    pub scalar_sqrt_latency: u32,
    pub scalar_add_latency: u32,
    pub scalar_mul_latency: u32,

    // SRAM, sizes in KiB
    pub sram_size: u32,
    pub sram_width: u32,
    #[serde(skip)]
    pub spad_size: u32,
    #[serde(skip)]
    pub accum_spad_size: u32,

    // DRAM
    pub dram_type: DramType,
    pub dram_freq: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dram_latency: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dram_config_path: Option<String>,
    pub dram_channels: u32,
    pub dram_req_size: u32,

    // Interconnect
    pub icnt_type: IcntType,
    pub icnt_freq: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icnt_latency: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icnt_config_path: Option<String>,

    #[serde(rename = "scheduler")]
    pub scheduler_type: String,

    /// Bytes per element
    pub precision: u32,

    pub layout: Layout,
}

impl Default for SimulationConfig {
    /// Small single-core systolic array, mostly useful for tests
    fn default() -> Self {
        Self {
            num_cores: 1,
            core_type: CoreType::SystolicWs,
            core_freq: 1000,
            core_width: 8,
            core_height: 8,
            vector_process_bit: 256,
            add_latency: 1,
            mul_latency: 1,
            exp_latency: 1,
            gelu_latency: 1,
            add_tree_latency: 1,
            scalar_sqrt_latency: 1,
            scalar_add_latency: 1,
            scalar_mul_latency: 1,
            sram_size: 64,
            sram_width: 32,
            spad_size: 64,
            accum_spad_size: 64,
            dram_type: DramType::Simple,
            dram_freq: 1000,
            dram_latency: None,
            dram_config_path: None,
            dram_channels: 1,
            dram_req_size: DEFAULT_DRAM_REQ_SIZE,
            icnt_type: IcntType::Simple,
            icnt_freq: 1000,
            icnt_latency: None,
            icnt_config_path: None,
            scheduler_type: "simple".to_string(),
            precision: 2,
            layout: Layout::Nchw,
        }
    }
}

impl SimulationConfig {
    /// Build a configuration from a parsed JSON document
    #[tracing::instrument(skip(value))]
    pub fn from_json(value: &Value) -> ConfigResult<Self> {
        let doc = ConfigDoc::new(value)?;
        let sram_size = doc.u32("sram_size")?;

        let config = Self {
            num_cores: doc.u32("num_cores")?,
            core_type: CoreType::parse(doc.str("core_type")?)?,
            core_freq: doc.u32("core_freq")?,
            core_width: doc.u32("core_width")?,
            core_height: doc.u32("core_height")?,

            vector_process_bit: doc.u32("vector_process_bit")?,
            add_latency: doc.u32("add_latency")?,
            mul_latency: doc.u32("mul_latency")?,
            exp_latency: doc.u32("exp_latency")?,
            gelu_latency: doc.u32("gelu_latency")?,
            add_tree_latency: doc.u32("add_tree_latency")?,
            scalar_sqrt_latency: doc.u32("scalar_sqrt_latency")?,
            scalar_add_latency: doc.u32("scalar_add_latency")?,
            scalar_mul_latency: doc.u32("scalar_mul_latency")?,

            sram_size,
            sram_width: doc.u32("sram_width")?,
            spad_size: sram_size,
            accum_spad_size: sram_size,

            dram_type: DramType::parse(doc.str("dram_type")?)?,
            dram_freq: doc.u32("dram_freq")?,
            dram_latency: doc.optional_u32("dram_latency")?,
            dram_config_path: doc.optional_str("dram_config_path")?.map(str::to_string),
            dram_channels: doc.u32("dram_channels")?,
            dram_req_size: doc.optional_u32("dram_req_size")?.unwrap_or(DEFAULT_DRAM_REQ_SIZE),

            icnt_type: IcntType::parse(doc.str("icnt_type")?)?,
            icnt_freq: doc.u32("icnt_freq")?,
            icnt_latency: doc.optional_u32("icnt_latency")?,
            icnt_config_path: doc.optional_str("icnt_config_path")?.map(str::to_string),

            scheduler_type: doc.str("scheduler")?.to_string(),
            precision: doc.u32("precision")?,
            layout: Layout::parse(doc.str("layout")?)?,
        };

        if config.precision == 0 {
            return Err(ConfigError::InvalidField {
                field: "precision",
                reason: "must be at least one byte".to_string(),
            });
        }

        tracing::debug!(
            core_type = %config.core_type,
            dram_type = %config.dram_type,
            icnt_type = %config.icnt_type,
            sram_kib = config.sram_size,
            precision = config.precision,
            "parsed simulation config"
        );
        Ok(config)
    }

    /// Read and parse a JSON configuration file
    pub fn from_path(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let value: Value = serde_json::from_str(&text)?;
        Self::from_json(&value)
    }

    /// Serialize back to the document schema accepted by [`Self::from_json`]
    pub fn to_json(&self) -> Value {
        // Every field is a plain scalar or string, so this cannot fail
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Operand scratchpad capacity in bytes
    pub fn spad_bytes(&self) -> u64 {
        u64::from(self.spad_size) * 1024
    }

    /// Accumulation scratchpad capacity in bytes
    pub fn accum_spad_bytes(&self) -> u64 {
        u64::from(self.accum_spad_size) * 1024
    }

    /// Align `addr` down to the DRAM request granularity
    pub fn align_address(&self, addr: Addr) -> Addr {
        let granularity = Addr::from(self.dram_req_size);
        if granularity == 0 {
            return addr;
        }
        addr - addr % granularity
    }

    /// Elements one vector-unit operation processes
    pub fn elements_per_vector(&self) -> u32 {
        self.precision
            .checked_mul(8)
            .and_then(|bits| self.vector_process_bit.checked_div(bits))
            .unwrap_or(0)
    }

    pub fn activation_layout(&self) -> Layout {
        self.layout
    }
}

/// Typed field access over a JSON object with config-specific errors
struct ConfigDoc<'a> {
    fields: &'a Map<String, Value>,
}

impl<'a> ConfigDoc<'a> {
    fn new(value: &'a Value) -> ConfigResult<Self> {
        value
            .as_object()
            .map(|fields| Self { fields })
            .ok_or(ConfigError::NotAnObject)
    }

    fn u32(&self, field: &'static str) -> ConfigResult<u32> {
        self.optional_u32(field)?.ok_or(ConfigError::MissingField(field))
    }

    fn str(&self, field: &'static str) -> ConfigResult<&'a str> {
        self.optional_str(field)?.ok_or(ConfigError::MissingField(field))
    }

    fn optional_u32(&self, field: &'static str) -> ConfigResult<Option<u32>> {
        let Some(value) = self.fields.get(field) else {
            return Ok(None);
        };
        value
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .map(Some)
            .ok_or_else(|| ConfigError::InvalidField {
                field,
                reason: format!("expected an unsigned 32-bit integer, found {value}"),
            })
    }

    fn optional_str(&self, field: &'static str) -> ConfigResult<Option<&'a str>> {
        let Some(value) = self.fields.get(field) else {
            return Ok(None);
        };
        value.as_str().map(Some).ok_or_else(|| ConfigError::InvalidField {
            field,
            reason: format!("expected a string, found {value}"),
        })
    }
}
