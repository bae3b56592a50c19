use anyhow::{anyhow, Result};
use kestrel_driver::driver::AppDriver;
use std::path::Path;

pub fn execute(descriptor: &Path, timeout_ms: u64) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        println!("🛑 Terminating via {}...", descriptor.display());
        AppDriver::quit_by_descriptor(descriptor, timeout_ms)
            .await
            .map_err(|e| anyhow!("{}: {}", e.code(), e))?;
        println!("✅ Process tree terminated");
        Ok(())
    })
}
