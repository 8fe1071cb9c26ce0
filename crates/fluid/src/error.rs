//! Error types for the fluid pipeline.

use crate::device::ShaderStage;
use crate::shaders::ShaderKind;

/// Shader compile/link failure with the device diagnostic attached.
#[derive(Debug, Clone, PartialEq)]
pub enum ShaderError {
    /// Malformed `#define`/`#ifdef` directive in a shader source.
    Preprocess { line: usize, message: String },
    Compile {
        kind: ShaderKind,
        stage: ShaderStage,
        log: String,
    },
    Link { log: String },
}

impl std::fmt::Display for ShaderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShaderError::Preprocess { line, message } => {
                write!(f, "Shader preprocess error at line {}: {}", line, message)
            }
            ShaderError::Compile { kind, stage, log } => {
                write!(f, "Failed to compile {:?} {:?} shader: {}", kind, stage, log)
            }
            ShaderError::Link { log } => write!(f, "Failed to link program: {}", log),
        }
    }
}

impl std::error::Error for ShaderError {}

/// Configuration load/validation failure.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
            ConfigError::Invalid(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Parse(e) => Some(e),
            ConfigError::Invalid(_) => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Top-level error for building or running a simulation.
#[derive(Debug)]
pub enum FluidError {
    Shader(ShaderError),
    Config(ConfigError),
    /// No texture format in the fallback chain is renderable on this device.
    NoRenderableFormat,
    /// Backend failure (surface lost, device lost, ...).
    Device(String),
}

impl std::fmt::Display for FluidError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FluidError::Shader(e) => write!(f, "{}", e),
            FluidError::Config(e) => write!(f, "{}", e),
            FluidError::NoRenderableFormat => {
                write!(f, "No renderable texture format supported by device")
            }
            FluidError::Device(msg) => write!(f, "Render device error: {}", msg),
        }
    }
}

impl std::error::Error for FluidError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FluidError::Shader(e) => Some(e),
            FluidError::Config(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ShaderError> for FluidError {
    fn from(e: ShaderError) -> Self {
        FluidError::Shader(e)
    }
}

impl From<ConfigError> for FluidError {
    fn from(e: ConfigError) -> Self {
        FluidError::Config(e)
    }
}
