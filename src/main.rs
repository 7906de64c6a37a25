fn main() -> anyhow::Result<()> {
    facectl::logging::init();
    facectl::cli::run()
}
