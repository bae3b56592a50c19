use anyhow::Result;
use clap::Command;
use clap_complete::{generate, Shell};
use std::io::Write;

/// Render the completion script for `shell` into `out`.
pub fn write_completions(shell: Shell, cmd: &mut Command, out: &mut dyn Write) {
    let bin_name = cmd.get_name().to_string();
    generate(shell, cmd, bin_name, out);
}

pub fn execute(shell: Shell, cmd: &mut Command) -> Result<()> {
    write_completions(shell, cmd, &mut std::io::stdout());
    Ok(())
}
