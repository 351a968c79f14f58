use std::fmt::Write as _;
use std::path::Path;
use crate::job::TranscodeJob;
use crate::transcode::FfmpegInvoker;

/// Render the plan as a standalone bash script, one job per line, for
/// operators who would rather run the batch under their own supervision.
pub fn render_script(jobs: &[TranscodeJob], invoker: &FfmpegInvoker) -> String {
    let mut out = String::from("#!/usr/bin/env bash\n# generated by mediabatch\nset -u\n\n");

    for job in jobs {
        let input = job.input.full_path();
        let dir = job.output_path.parent().unwrap_or_else(|| Path::new("."));
        let args: Vec<String> = invoker
            .build_args(&input, &job.output_path)
            .iter()
            .map(|a| shell_quote(a))
            .collect();

        let _ = writeln!(
            out,
            "mkdir -p {} && {} {}",
            shell_quote(&dir.to_string_lossy()),
            shell_quote(&invoker.ffmpeg_bin().to_string_lossy()),
            args.join(" ")
        );
    }
    out
}

/// Single-quote for POSIX shells unless the word is plainly safe
pub fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=+,".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}
