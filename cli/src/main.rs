fn main() -> anyhow::Result<()> {
    wdsync_cli::run()
}
