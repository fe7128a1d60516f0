fn main() {
    println!("cargo:rerun-if-changed=lib");

    // Npcap SDK import libraries live in ./lib on Windows; elsewhere libpcap is found by the pcap crate
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("windows") {
        println!("cargo:rustc-link-search=native=lib");
        println!("cargo:rustc-link-lib=wpcap");
        println!("cargo:rustc-link-lib=Packet");
    }
}
