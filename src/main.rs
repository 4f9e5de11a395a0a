fn main() -> anyhow::Result<()> {
    photoindex_lib::run()
}
