//! Command line arguments backing the `labelingo` binary.
use anyhow::{bail, Result};
use clap::Parser;
use std::path::{Path, PathBuf};

use crate::core::config::Config;
use crate::core::types::{ImageJob, OutputFormat, ProcessingConfig};

#[derive(Parser, Debug)]
#[command(
    name = "labelingo",
    about = "Annotate UI screenshots with numbered translation callouts",
    version
)]
pub struct Args {
    /// Screenshots to annotate
    #[arg(required_unless_present = "clear_cache")]
    pub images: Vec<PathBuf>,

    /// Output file (single image only)
    #[arg(long, short = 'o', conflicts_with = "output_dir")]
    pub output: Option<PathBuf>,

    /// Directory for annotated outputs (default: next to each input)
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Output format: svg, png or pdf
    #[arg(long, short = 'f')]
    pub format: Option<OutputFormat>,

    /// Target language for translations (default: from TARGET_LANGUAGE or the locale)
    #[arg(long, short = 'l')]
    pub language: Option<String>,

    /// Caption drawn above the screenshot
    #[arg(long)]
    pub title: Option<String>,

    /// Skip cached analysis results and do not store new ones
    #[arg(long)]
    pub no_cache: bool,

    /// Remove every cached analysis result before processing
    #[arg(long)]
    pub clear_cache: bool,

    /// Print collected metrics as JSON when done
    #[arg(long)]
    pub stats: bool,

    /// Print the batch result as JSON instead of a summary
    #[arg(long)]
    pub json: bool,

    /// Enable debug logging (matching diagnostics included)
    #[arg(long)]
    pub debug: bool,
}

impl Args {
    /// Fold CLI flags into the environment-derived configuration
    pub fn apply_to(&self, config: &mut Config) {
        if self.debug {
            config.log_level = tracing::Level::DEBUG;
        }
        if let Some(format) = self.format {
            config.rendering.output_format = format;
        }
        if let Some(language) = &self.language {
            config.analysis.target_language = language.clone();
        }
        if self.no_cache {
            config.cache.enabled = false;
        }
    }

    pub fn processing_config(&self) -> ProcessingConfig {
        ProcessingConfig {
            output_format: self.format,
            title: self.title.clone(),
            target_language: self.language.clone(),
            cache_enabled: self.no_cache.then_some(false),
        }
    }

    /// One job per input image, with its resolved output path
    pub fn jobs(&self, format: OutputFormat) -> Result<Vec<ImageJob>> {
        if self.output.is_some() && self.images.len() > 1 {
            bail!("--output accepts a single image, got {}; use --output-dir", self.images.len());
        }

        Ok(self
            .images
            .iter()
            .enumerate()
            .map(|(index, input)| ImageJob {
                index,
                input_path: input.clone(),
                output_path: match (&self.output, &self.output_dir) {
                    (Some(output), _) => output.clone(),
                    (None, Some(dir)) => dir.join(annotated_name(input, format)),
                    (None, None) => input.with_file_name(annotated_name(input, format)),
                },
            })
            .collect())
    }
}

/// `shot.png` → `shot-annotated.svg`
pub fn annotated_name(input: &Path, format: OutputFormat) -> String {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    format!("{}-annotated.{}", stem, format.extension())
}
