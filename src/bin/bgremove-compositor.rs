//! bgremove-compositor CLI
//!
//! Removes photo backgrounds and composites the cutouts onto templates.

#[cfg(feature = "cli")]
use bgremove_compositor::cli;

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI feature not enabled. Please rebuild with --features cli");
    std::process::exit(1);
}
