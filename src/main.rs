fn main() {
    #[cfg(not(target_arch = "wasm32"))]
    character_scene::run();
}
