fn main() -> anyhow::Result<()> {
    the_small_delivery_lib::run()
}
