//! Configuration conversion utilities for CLI arguments

use crate::cli::main_impl::{Cli, CliBackend, CliOutputFormat};
use crate::{
    config::{CompositorConfig, MattingBackend, OutputFormat},
    types::{SizingInstruction, SizingMode},
};
use anyhow::{Context, Result};
use std::num::NonZeroU32;
use std::path::PathBuf;

/// Convert CLI arguments to a `CompositorConfig`
pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Configuration file (or defaults) with the flags applied on top
    pub(crate) fn from_cli(cli: &Cli) -> Result<CompositorConfig> {
        let mut config = match &cli.config {
            Some(path) => CompositorConfig::from_json_file(path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
            None => CompositorConfig::default(),
        };

        if let Some(dir) = &cli.templates_dir {
            config.templates_dir.clone_from(dir);
        }
        for entry in &cli.template_files {
            let (id, path) = Self::parse_template_file(entry)?;
            config.templates.insert(id, path);
        }
        if let Some(backend) = cli.backend {
            config.matting_backend = Self::convert_backend(backend);
        }
        if let Some(model) = &cli.model {
            config.model_path = Some(model.clone());
        }
        if let Some(format) = cli.format {
            config.output_format = Self::convert_output_format(format);
        }
        if let Some(quality) = cli.jpeg_quality {
            config.jpeg_quality = quality;
        }
        if cli.no_enhance {
            config.enhancement.enabled = false;
        }
        if cli.height.is_some() {
            config.default_sizing_mode = SizingMode::ByHeight;
        } else if cli.width.is_some() {
            config.default_sizing_mode = SizingMode::ByWidth;
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    /// Sizing requested with `--width` or `--height`, if any
    pub(crate) fn sizing(cli: &Cli, config: &CompositorConfig) -> Result<Option<SizingInstruction>> {
        let (mode, pixels) = match (cli.width, cli.height) {
            (Some(width), _) => (SizingMode::ByWidth, width),
            (None, Some(height)) => (SizingMode::ByHeight, height),
            (None, None) => return Ok(None),
        };

        let dimension = NonZeroU32::new(pixels)
            .ok_or_else(|| anyhow::anyhow!("--{} must be a positive number of pixels", mode))?;
        if pixels > config.max_dimension {
            anyhow::bail!(
                "--{} {} exceeds the maximum of {} pixels",
                mode,
                pixels,
                config.max_dimension
            );
        }
        Ok(Some(SizingInstruction::new(mode, dimension)))
    }

    /// Parse an `ID=PATH` template registration
    fn parse_template_file(entry: &str) -> Result<(String, PathBuf)> {
        match entry.split_once('=') {
            Some((id, path)) if !id.trim().is_empty() && !path.trim().is_empty() => {
                Ok((id.trim().to_string(), PathBuf::from(path.trim())))
            },
            _ => anyhow::bail!("Invalid --template-file '{}': expected ID=PATH", entry),
        }
    }

    fn convert_output_format(format: CliOutputFormat) -> OutputFormat {
        match format {
            CliOutputFormat::Png => OutputFormat::Png,
            CliOutputFormat::Jpeg => OutputFormat::Jpeg,
            CliOutputFormat::Webp => OutputFormat::WebP,
        }
    }

    fn convert_backend(backend: CliBackend) -> MattingBackend {
        match backend {
            CliBackend::Tract => MattingBackend::Tract,
            CliBackend::Mock => MattingBackend::Mock,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["bgremove-compositor"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_flags_override_defaults() {
        let cli = parse(&[
            "in.png",
            "--template",
            "2",
            "--height",
            "600",
            "--backend",
            "mock",
            "--format",
            "webp",
            "--jpeg-quality",
            "70",
            "--no-enhance",
            "--template-file",
            "3=frames/gold.png",
        ]);
        let config = CliConfigBuilder::from_cli(&cli).unwrap();

        assert_eq!(config.default_template, "1");
        assert_eq!(config.default_sizing_mode, SizingMode::ByHeight);
        assert_eq!(config.matting_backend, MattingBackend::Mock);
        assert_eq!(config.output_format, OutputFormat::WebP);
        assert_eq!(config.jpeg_quality, 70);
        assert!(!config.enhancement.enabled);
        assert_eq!(config.templates.get("3"), Some(&PathBuf::from("frames/gold.png")));
    }

    #[test]
    fn test_config_file_is_the_base() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("compositor.json");
        CompositorConfig::builder()
            .jpeg_quality(55)
            .max_dimension(500)
            .build()
            .unwrap()
            .to_json_file(&path)
            .unwrap();

        let cli = parse(&["in.png", "--config", path.to_str().unwrap()]);
        let config = CliConfigBuilder::from_cli(&cli).unwrap();
        assert_eq!(config.jpeg_quality, 55);
        assert_eq!(config.max_dimension, 500);
    }

    #[test]
    fn test_sizing_from_flags() {
        let config = CompositorConfig::default();

        let sizing = CliConfigBuilder::sizing(&parse(&["a.png", "--width", "1200"]), &config)
            .unwrap()
            .unwrap();
        assert_eq!(sizing.mode, SizingMode::ByWidth);
        assert_eq!(sizing.dimension.get(), 1200);

        assert!(CliConfigBuilder::sizing(&parse(&["a.png"]), &config)
            .unwrap()
            .is_none());
        assert!(CliConfigBuilder::sizing(&parse(&["a.png", "--height", "0"]), &config).is_err());
        assert!(
            CliConfigBuilder::sizing(&parse(&["a.png", "--height", "100000"]), &config).is_err()
        );
    }

    #[test]
    fn test_template_file_syntax() {
        assert!(CliConfigBuilder::parse_template_file("7=x.png").is_ok());
        assert!(CliConfigBuilder::parse_template_file("x.png").is_err());
        assert!(CliConfigBuilder::parse_template_file("=x.png").is_err());
        assert!(CliConfigBuilder::parse_template_file("7=").is_err());
    }
}
