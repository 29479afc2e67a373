mod artifact_cache;
mod launch;
mod native;
