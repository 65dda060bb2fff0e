pub const ALLELESCOPE_DISPLAY_VERSION: &str = env!("ALLELESCOPE_DISPLAY_VERSION");
pub const ALLELESCOPE_BUILD_N: &str = env!("ALLELESCOPE_BUILD_N");

pub fn version_cli_text() -> String {
    format!(
        "allelescope {}\nBuild {}\nSTR electropherogram layers and allele-call editing",
        ALLELESCOPE_DISPLAY_VERSION, ALLELESCOPE_BUILD_N
    )
}
