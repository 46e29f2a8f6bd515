use std::fmt::Write;
use std::path::Path;

use lib::core::config::TestDefinition;
use lib::core::effects::Effects;
use lib::try_exit_code;
use lib::util::EyreExitOr;
use patchwork_ci_test::load_config;
use tracing::instrument;

/// Print the configured tests, in the order they run.
#[instrument]
pub fn list(effects: &Effects, config_path: &Path) -> EyreExitOr<()> {
    let config = try_exit_code!(load_config(effects, config_path));

    if config.tests.is_empty() {
        writeln!(
            effects.get_output_stream(),
            "No tests configured in {}",
            config_path.display()
        )?;
        return Ok(Ok(()));
    }

    let scripts_dir = config.get_scripts_dir();
    let glyphs = effects.get_glyphs();
    for TestDefinition {
        name,
        description,
        script,
    } in &config.tests
    {
        let script = scripts_dir.join(script);
        let missing = if script.is_file() { "" } else { " (missing)" };
        writeln!(
            effects.get_output_stream(),
            "{} {name}: {description} [{}{missing}]",
            glyphs.bullet_point,
            script.display(),
        )?;
    }
    Ok(Ok(()))
}
