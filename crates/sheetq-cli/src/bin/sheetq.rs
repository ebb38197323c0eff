fn main() -> anyhow::Result<()> {
    sheetq_cli::cli::run()
}
