fn main() {
    std::process::exit(endsession::app::startup::startup());
}
