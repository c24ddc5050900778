use anyhow::Result;

fn main() -> Result<()> {
    shroud::cli::run()
}
