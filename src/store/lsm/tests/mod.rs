mod tests_run;
mod tests_store;
