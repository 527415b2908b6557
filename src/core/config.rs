use crate::core::errors::ConfigError;
use crate::core::types::OutputFormat;
use crate::services::analysis::AnalysisBackend;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::path::Path;
use tracing::Level;

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub cache_dir: String,
    pub enabled: bool,
}

/// Label layout configuration.
///
/// Pixel values are cosmetic defaults. The vertical spacing between labels is
/// fixed by [`crate::services::layout::MIN_SPACING`] and is not configurable.
#[derive(Debug, Clone)]
pub struct LayoutConfig {
    pub font_size: f64,
    /// Added to the widest label of a side to get that side's margin
    pub label_padding: f64,
    /// Gap between a right-side label and the start of its connector
    pub connector_offset: f64,
    pub marker_radius: f64,
    pub marker_gap: f64,
    /// Images wider than this are scaled down before layout
    pub max_image_width: f64,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            font_size: 14.0,
            label_padding: 20.0,
            connector_offset: 10.0,
            marker_radius: 9.0,
            marker_gap: 6.0,
            max_image_width: 1200.0,
        }
    }
}

/// Rendering configuration
#[derive(Debug, Clone)]
pub struct RenderingConfig {
    pub font_family: String,
    pub accent_color: String,
    pub label_color: String,
    pub output_format: OutputFormat,
}

impl Default for RenderingConfig {
    fn default() -> Self {
        Self {
            font_family: "Arial, Helvetica, sans-serif".to_string(),
            accent_color: "#d62828".to_string(),
            label_color: "#1d1d1f".to_string(),
            output_format: OutputFormat::Svg,
        }
    }
}

/// Batch processing configuration
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Maximum number of images annotated concurrently
    pub max_concurrent_images: usize,
}

/// Analysis collaborator selection
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub ocr_backend: AnalysisBackend,
    pub translation_backend: AnalysisBackend,
    pub target_language: String,
}

/// Main application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: Level,
    pub cache: CacheConfig,
    pub layout: LayoutConfig,
    pub rendering: RenderingConfig,
    pub batch: BatchConfig,
    pub analysis: AnalysisConfig,
}

impl Config {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        let config = Self::from_lookup(|name| env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Build a configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let parsed = |name: &'static str| parse_var::<f64>(name, lookup(name));
        let flag = |name: &'static str| -> Result<Option<bool>, ConfigError> {
            lookup(name)
                .map(|s| match s.trim().to_lowercase().as_str() {
                    "true" | "1" | "yes" | "on" => Ok(true),
                    "false" | "0" | "no" | "off" => Ok(false),
                    _ => Err(ConfigError::EnvVarError {
                        name,
                        reason: format!("'{}' is not a boolean", s),
                    }),
                })
                .transpose()
        };

        let log_level = lookup("LOG_LEVEL")
            .and_then(|s| match s.to_lowercase().as_str() {
                "trace" => Some(Level::TRACE),
                "debug" => Some(Level::DEBUG),
                "info" => Some(Level::INFO),
                "warn" | "warning" => Some(Level::WARN),
                "error" => Some(Level::ERROR),
                _ => None,
            })
            .unwrap_or(Level::INFO);

        let output_format = match lookup("OUTPUT_FORMAT") {
            Some(value) => value.parse().map_err(|reason| ConfigError::EnvVarError {
                name: "OUTPUT_FORMAT",
                reason,
            })?,
            None => OutputFormat::Svg,
        };

        let backend = |name: &'static str| -> Result<AnalysisBackend, ConfigError> {
            match lookup(name) {
                Some(value) => value.parse().map_err(|e: crate::core::errors::ProviderError| {
                    ConfigError::EnvVarError {
                        name,
                        reason: e.to_string(),
                    }
                }),
                None => Ok(AnalysisBackend::Precomputed),
            }
        };

        let defaults = LayoutConfig::default();
        let rendering_defaults = RenderingConfig::default();

        Ok(Self {
            log_level,
            cache: CacheConfig {
                cache_dir: lookup("CACHE_DIR").unwrap_or_else(|| default_cache_dir(&lookup)),
                enabled: flag("CACHE_ENABLED")?.unwrap_or(true),
            },
            layout: LayoutConfig {
                font_size: parsed("LABEL_FONT_SIZE")?.unwrap_or(defaults.font_size),
                label_padding: parsed("LABEL_PADDING")?.unwrap_or(defaults.label_padding),
                connector_offset: parsed("CONNECTOR_OFFSET")?.unwrap_or(defaults.connector_offset),
                marker_radius: defaults.marker_radius,
                marker_gap: defaults.marker_gap,
                max_image_width: parsed("MAX_IMAGE_WIDTH")?.unwrap_or(defaults.max_image_width),
            },
            rendering: RenderingConfig {
                font_family: lookup("LABEL_FONT_FAMILY").unwrap_or(rendering_defaults.font_family),
                accent_color: lookup("ACCENT_COLOR").unwrap_or(rendering_defaults.accent_color),
                label_color: rendering_defaults.label_color,
                output_format,
            },
            batch: BatchConfig {
                max_concurrent_images: parse_var(
                    "MAX_CONCURRENT_IMAGES",
                    lookup("MAX_CONCURRENT_IMAGES"),
                )?
                .unwrap_or_else(num_cpus::get),
            },
            analysis: AnalysisConfig {
                ocr_backend: backend("OCR_BACKEND")?,
                translation_backend: backend("TRANSLATION_BACKEND")?,
                target_language: lookup("TARGET_LANGUAGE")
                    .unwrap_or_else(|| language_from_locale(lookup("LANG").as_deref())),
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(4.0..=72.0).contains(&self.layout.font_size) {
            return Err(ConfigError::InvalidLayoutConfig(format!(
                "font_size must be between 4 and 72, got {}",
                self.layout.font_size
            )));
        }

        // Labels taller than the packing step would overlap
        if self.layout.font_size * 1.4 > crate::services::layout::MIN_SPACING {
            return Err(ConfigError::InvalidLayoutConfig(format!(
                "font_size {} is too large for the {}px label spacing",
                self.layout.font_size,
                crate::services::layout::MIN_SPACING
            )));
        }

        if self.layout.label_padding < 0.0 || self.layout.connector_offset < 0.0 {
            return Err(ConfigError::InvalidLayoutConfig(
                "label_padding and connector_offset must be non-negative".to_string(),
            ));
        }

        if self.layout.max_image_width <= 0.0 {
            return Err(ConfigError::InvalidLayoutConfig(format!(
                "max_image_width must be > 0, got {}",
                self.layout.max_image_width
            )));
        }

        if self.rendering.font_family.trim().is_empty() {
            return Err(ConfigError::InvalidRenderingConfig(
                "font_family must not be empty".to_string(),
            ));
        }

        if self.batch.max_concurrent_images == 0 {
            return Err(ConfigError::InvalidConcurrency(self.batch.max_concurrent_images));
        }

        let cache_path = Path::new(&self.cache.cache_dir);
        if cache_path.is_file() {
            return Err(ConfigError::InvalidCachePath(format!(
                "{} is a file, expected a directory",
                cache_path.display()
            )));
        }

        Ok(())
    }

    pub fn log_level(&self) -> Level {
        self.log_level
    }

    pub fn cache_dir(&self) -> &str {
        &self.cache.cache_dir
    }

    pub fn cache_enabled(&self) -> bool {
        self.cache.enabled
    }

    pub fn max_concurrent_images(&self) -> usize {
        self.batch.max_concurrent_images
    }

    pub fn output_format(&self) -> OutputFormat {
        self.rendering.output_format
    }

    pub fn target_language(&self) -> &str {
        &self.analysis.target_language
    }
}

fn parse_var<T>(name: &'static str, value: Option<String>) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value
        .map(|s| {
            s.trim().parse::<T>().map_err(|e| ConfigError::EnvVarError {
                name,
                reason: format!("'{}': {}", s, e),
            })
        })
        .transpose()
}

fn default_cache_dir<F>(lookup: &F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    match lookup("HOME") {
        Some(home) => format!("{}/.labelingo/cache", home.trim_end_matches('/')),
        None => ".labelingo/cache".to_string(),
    }
}

/// "fr_FR.UTF-8" -> "fr"; falls back to English
fn language_from_locale(locale: Option<&str>) -> String {
    locale
        .and_then(|l| l.split(['_', '.', '-']).next())
        .map(|l| l.trim().to_lowercase())
        .filter(|l| !l.is_empty() && l != "c" && l != "posix")
        .unwrap_or_else(|| "en".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[("HOME", "/home/ana")]).unwrap();
        assert_eq!(config.cache_dir(), "/home/ana/.labelingo/cache");
        assert!(config.cache_enabled());
        assert_eq!(config.output_format(), OutputFormat::Svg);
        assert_eq!(config.target_language(), "en");
        assert_eq!(config.log_level(), Level::INFO);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_target_language_from_locale() {
        let config = config_from(&[("LANG", "fr_FR.UTF-8")]).unwrap();
        assert_eq!(config.target_language(), "fr");

        let config = config_from(&[("LANG", "C"), ("TARGET_LANGUAGE", "de")]).unwrap();
        assert_eq!(config.target_language(), "de");

        assert_eq!(language_from_locale(Some("POSIX")), "en");
    }

    #[test]
    fn test_invalid_output_format_is_rejected() {
        let err = config_from(&[("OUTPUT_FORMAT", "tiff")]).unwrap_err();
        assert!(matches!(err, ConfigError::EnvVarError { name: "OUTPUT_FORMAT", .. }));
    }

    #[test]
    fn test_unparsable_numbers_and_flags_are_rejected() {
        let err = config_from(&[("LABEL_FONT_SIZE", "abc")]).unwrap_err();
        assert!(matches!(err, ConfigError::EnvVarError { name: "LABEL_FONT_SIZE", .. }));

        let err = config_from(&[("CACHE_ENABLED", "maybe")]).unwrap_err();
        assert!(matches!(err, ConfigError::EnvVarError { name: "CACHE_ENABLED", .. }));

        let err = config_from(&[("MAX_CONCURRENT_IMAGES", "2.5")]).unwrap_err();
        assert!(matches!(err, ConfigError::EnvVarError { name: "MAX_CONCURRENT_IMAGES", .. }));

        let config = config_from(&[("CACHE_ENABLED", "0"), ("LABEL_PADDING", " 12 ")]).unwrap();
        assert!(!config.cache_enabled());
        assert_eq!(config.layout.label_padding, 12.0);
    }

    #[test]
    fn test_unknown_backend_is_rejected() {
        let err = config_from(&[("OCR_BACKEND", "paddleocr")]).unwrap_err();
        assert!(matches!(err, ConfigError::EnvVarError { name: "OCR_BACKEND", .. }));
    }

    #[test]
    fn test_validation() {
        let mut config = config_from(&[("MAX_CONCURRENT_IMAGES", "0")]).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidConcurrency(0))));

        config.batch.max_concurrent_images = 2;
        config.layout.font_size = 40.0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidLayoutConfig(_))));

        config.layout.font_size = 12.0;
        config.layout.max_image_width = 0.0;
        assert!(config.validate().is_err());
    }
}
