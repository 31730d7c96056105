use std::{env, process::ExitCode, time::Instant};

use langur::{Context, Object};

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    let Some(file_path) = args.get(1) else {
        eprintln!("usage: langur <script.ape>");
        return ExitCode::FAILURE;
    };

    let mut ctx = Context::new();

    let start = Instant::now();
    let code = match ctx.compile_file(file_path) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error:\n{err}");
            for extra in ctx.errors().iter().skip(1) {
                eprintln!("{extra}");
            }
            return ExitCode::FAILURE;
        }
    };

    match ctx.execute(&code) {
        Ok(value) => {
            let elapsed = start.elapsed();
            if !matches!(value, Object::Null) {
                eprintln!("result: {value:?}");
            }
            eprintln!("finished in {elapsed:?}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            let elapsed = start.elapsed();
            eprintln!("error after {elapsed:?}:\n{err}");
            ExitCode::FAILURE
        }
    }
}
