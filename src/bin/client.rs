//! Command-line client for the store service

use clap::Parser;
use kvgate::cli::{ClientArgs, ClientCommand};
use kvgate::{Client, KvError, Result};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let args = ClientArgs::parse();
    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: ClientArgs) -> Result<ExitCode> {
    let mut client = Client::connect(&args.server).await?;

    let code = match args.command {
        ClientCommand::Store { key, value } => {
            client.store(&key, &value).await?;
            println!("OK");
            ExitCode::SUCCESS
        }
        ClientCommand::Retrieve { key } => {
            let response = client.retrieve(&key).await?;
            if response.found {
                println!("{}", response.value);
                ExitCode::SUCCESS
            } else {
                println!("(nil)");
                ExitCode::from(2)
            }
        }
        ClientCommand::Delete(delete) if delete.strict => match client.delete_strict(&delete.key).await {
            Ok(_) => {
                println!("OK");
                ExitCode::SUCCESS
            }
            Err(KvError::NotFound(message)) => {
                println!("{}", message);
                ExitCode::from(2)
            }
            Err(e) => return Err(e),
        },
        ClientCommand::Delete(delete) => {
            if client.delete(&delete.key).await?.success {
                println!("OK");
                ExitCode::SUCCESS
            } else {
                println!("Key not found");
                ExitCode::from(2)
            }
        }
    };

    client.close().await?;
    Ok(code)
}
