fn main() -> anyhow::Result<()> {
    cfgroots::run()?;
    Ok(())
}
