mod tests_counters;
mod tests_trigger;
