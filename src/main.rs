fn main() {
    floorlink_lib::run()
}
