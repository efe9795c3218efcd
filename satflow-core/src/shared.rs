/// Builds the pipeline components from [crate::config::Settings].
pub(crate) mod create_components;

#[cfg(test)]
pub(crate) mod test_utils;
