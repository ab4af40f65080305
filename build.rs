fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    if std::env::var_os("CARGO_FEATURE_NIDAQ").is_some() {
        println!("cargo:rustc-link-lib=NIDAQmx");
        #[cfg(target_os = "windows")]
        println!(
            "cargo:rustc-link-search=native=C:/Program Files (x86)/National Instruments/NI-DAQ/DAQmx ANSI C Dev/lib/msvc"
        );
    }
}
