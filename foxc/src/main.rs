#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser as ClapParser;
use fox_ast::AstContext;
use fox_common::{DiagnosticEngine, SourceManager, StreamConsumer};
use fox_lex::Lexer;
use fox_parse::Parser;

#[derive(ClapParser, Debug)]
#[command(name = "foxc", version, about = "Compiler front-end for the Fox language")]
struct Cli {
    /// Source file to compile
    file: PathBuf,

    /// Print the token stream after lexing
    #[arg(long, default_value_t = false)]
    dump_tokens: bool,

    /// Print the bytecode module after generation
    #[arg(long, default_value_t = false)]
    dump_bc: bool,

    /// Stop after semantic analysis
    #[arg(long, default_value_t = false)]
    verify_only: bool,

    /// Treat warnings as errors
    #[arg(long, default_value_t = false)]
    werr: bool,
}

fn main() -> miette::Result<ExitCode> {
    let cli = Cli::parse();

    let mut sm = SourceManager::new();
    let file = sm.load_file(&cli.file)?;

    let consumer = StreamConsumer::new(std::io::stderr());
    let mut diags = DiagnosticEngine::new(&sm, Box::new(consumer));
    diags.set_warnings_are_errors(cli.werr);
    let mut ctx = AstContext::new();

    let tokens = Lexer::new(&mut ctx, &mut diags, file, sm.content(file)).lex();
    if cli.dump_tokens {
        for token in &tokens {
            println!("{:?} @ {}..{}", token.kind, token.range.begin.offset, token.range.end().offset);
        }
    }

    let unit_name = ctx.ident(&cli.file.display().to_string());
    let unit = Parser::new(&mut ctx, &mut diags, file, sm.content(file), &tokens)
        .parse_unit(unit_name);

    if !diags.had_errors() {
        fox_sema::check_unit(&mut ctx, &mut diags, unit);
    }

    if !diags.had_errors() && !cli.verify_only {
        let module = fox_bc::generate_module(&ctx, &mut diags, unit);
        if cli.dump_bc && !diags.had_errors() {
            for (idx, instr) in module.instrs.iter().enumerate() {
                println!("{idx:4}  {instr:?}");
            }
            for func in &module.functions {
                println!(
                    "func {} ({} params, {} regs) @ {:?}",
                    func.name, func.param_count, func.register_count, func.range
                );
            }
            for global in &module.globals {
                println!("global {} : {:?} @ {:?}", global.name, global.tag, global.init_range);
            }
        }
    }

    if diags.had_errors() {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}
