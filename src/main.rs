fn main() -> anyhow::Result<()> {
    uma_companion_lib::run()
}
