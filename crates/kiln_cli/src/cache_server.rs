//! `kiln cache-server`: serves artifacts to remote cache clients.

use kiln_cache::CacheServer;

use crate::CacheServerArgs;

/// Runs the `kiln cache-server` command until the process is stopped.
pub fn run(args: &CacheServerArgs) -> Result<i32, Box<dyn std::error::Error>> {
    CacheServer::bind(args.bind.as_str(), args.capacity)?
        .spawn()?
        .wait();
    Ok(0)
}
