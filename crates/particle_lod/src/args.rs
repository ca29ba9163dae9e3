//! Command line.

use std::path::PathBuf;

/// Printed for `--help` and on argument errors.
pub const USAGE: &str = "\
usage: particle_lod [--config <path>] [--frames <n>] [--resize <particles>] [--cpu-only]

  --config <path>        TOML configuration, defaults when absent
  --frames <n>           frames to run (default 4)
  --resize <particles>   switch to this particle count halfway through
  --cpu-only             run the host executor only
";

const DEFAULT_FRAMES: u32 = 4;

/// Parsed arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Args {
    pub config: Option<PathBuf>,
    pub frames: u32,
    pub resize: Option<u32>,
    pub cpu_only: bool,
    pub help: bool,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            config: None,
            frames: DEFAULT_FRAMES,
            resize: None,
            cpu_only: false,
            help: false,
        }
    }
}

impl Args {
    /// Parses arguments, program name excluded.
    pub fn parse<I: IntoIterator<Item = String>>(args: I) -> Result<Self, String> {
        let mut out = Self::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" => out.config = Some(PathBuf::from(value(&mut args, &arg)?)),
                "--frames" => out.frames = number(&mut args, &arg)?,
                "--resize" => out.resize = Some(number(&mut args, &arg)?),
                "--cpu-only" => out.cpu_only = true,
                "-h" | "--help" => out.help = true,
                other => return Err(format!("unknown argument `{other}`")),
            }
        }
        Ok(out)
    }

    /// Frame at which the resize applies, if any.
    pub fn resize_frame(&self) -> Option<(u32, u32)> {
        self.resize.map(|particles| (self.frames / 2, particles))
    }
}

fn value(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<String, String> {
    args.next().ok_or_else(|| format!("{flag} needs a value"))
}

fn number(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<u32, String> {
    let raw = value(args, flag)?;
    raw.parse().map_err(|e| format!("{flag} `{raw}`: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Result<Args, String> {
        Args::parse(line.split_whitespace().map(String::from))
    }

    #[test]
    fn test_defaults() {
        let args = parse("").unwrap();
        assert_eq!(args, Args::default());
        assert_eq!(args.frames, 4);
        assert!(args.resize_frame().is_none());
    }

    #[test]
    fn test_all_flags() {
        let args = parse("--config lod.toml --frames 10 --resize 200000 --cpu-only").unwrap();
        assert_eq!(args.config, Some(PathBuf::from("lod.toml")));
        assert_eq!(args.frames, 10);
        assert!(args.cpu_only);
        assert_eq!(args.resize_frame(), Some((5, 200_000)));
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(parse("--frames").unwrap_err().contains("needs a value"));
        assert!(parse("--frames many").is_err());
        assert!(parse("--fast").unwrap_err().contains("--fast"));
    }
}
