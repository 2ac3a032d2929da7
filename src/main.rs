fn main() -> anyhow::Result<()> {
    learnclock_lib::run()
}
