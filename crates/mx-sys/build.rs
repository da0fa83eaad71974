fn main() {
    // Only build the engine glue library when the `cpp` feature is enabled.
    #[cfg(feature = "cpp")]
    {
        use std::env;

        let engine_src = env::var("MX_ENGINE_SRC").unwrap_or_else(|_| "../../engine".to_string());

        let dst = cmake::Config::new(&engine_src)
            .define("CMAKE_BUILD_TYPE", "Release")
            .build();

        println!(
            "cargo:rustc-link-search=native={}",
            dst.join("lib").display()
        );
        println!("cargo:rustc-link-lib=static=mxrs_capi");

        #[cfg(target_os = "macos")]
        println!("cargo:rustc-link-lib=c++");

        println!("cargo:rerun-if-env-changed=MX_ENGINE_SRC");
    }
}
