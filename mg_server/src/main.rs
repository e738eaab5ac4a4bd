#[macro_use]
extern crate log;

use clap::Parser;
use mg_server::{config::Config, game::Game, item::ItemTypes, store::WorldStore};
use std::{path::PathBuf, process, sync::Arc};

#[derive(Parser, Debug)]
#[clap(about, version, author)]
struct Args {
  /// The world directory to serve. Must contain a level.dat.
  world: PathBuf,

  /// Listen address, overriding the config file.
  #[clap(long)]
  addr: Option<String>,

  /// Refuse logins with this message.
  #[clap(long)]
  maintenance: Option<String>,

  /// Path to the config file.
  #[clap(long, default_value = "server.toml")]
  config: PathBuf,
}

fn main() {
  let args = Args::parse();

  let mut config = match Config::load(&args.config) {
    Ok(config) => config,
    Err(e) => {
      eprintln!("{e}");
      process::exit(1);
    }
  };
  if let Some(addr) = args.addr {
    config.address = addr;
  }
  if args.maintenance.is_some() {
    config.maintenance_msg = args.maintenance;
  }

  mg_common::init_with_level("server", config.log_level());

  let addr = match config.address.parse() {
    Ok(v) => v,
    Err(e) => {
      error!("invalid address {}: {e}", config.address);
      process::exit(1);
    }
  };

  let types = if config.items_path.is_empty() {
    ItemTypes::default_types()
  } else {
    match std::fs::File::open(&config.items_path).map_err(|e| e.to_string()).and_then(|f| {
      ItemTypes::from_json(f).map_err(|e| e.to_string())
    }) {
      Ok(types) => types,
      Err(e) => {
        error!("could not load item defs from {}: {e}", config.items_path);
        process::exit(1);
      }
    }
  };

  let store = match WorldStore::load(args.world.clone()) {
    Ok(store) => store,
    Err(e) => {
      error!("could not load world at {}: {e}", args.world.display());
      process::exit(1);
    }
  };
  info!("loaded world {:?} (seed {:#x})", store.level_name(), store.seed());

  let game = Game::new(store, Arc::new(types), config);
  match game.serve(addr) {
    Ok(()) => {}
    Err(e) => {
      error!("listen failure: {e}");
      process::exit(1);
    }
  }
}
