use crate::task::Task;
use crate::value_function::ActionValueFunction;
use candle_core::{Result, bail};
use std::fmt::Display;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Lifecycle hooks around the GPI loop. Finish rules are callbacks whose
/// `interrupt_gpi` eventually returns true.
///
/// Hooks run on the training thread in registration order and are expected to
/// be side effecting (logging, checkpointing). Errors abort the run.
pub trait Callback<T: Task, V> {
    fn define_log_tag(&self) -> String;

    fn before_gpi_start(&mut self, _task: &T, _value_function: &V) -> Result<()> {
        Ok(())
    }

    fn before_update(&mut self, _iteration_count: usize, _task: &T, _value_function: &V) -> Result<()> {
        Ok(())
    }

    fn after_update(&mut self, _iteration_count: usize, _task: &T, _value_function: &V) -> Result<()> {
        Ok(())
    }

    fn after_gpi_finish(&mut self, _task: &T, _value_function: &V) -> Result<()> {
        Ok(())
    }

    /// Polled after every iteration. The first callback returning true stops
    /// the run.
    fn interrupt_gpi(
        &mut self,
        _iteration_count: usize,
        _task: &T,
        _value_function: &V,
    ) -> Result<bool> {
        Ok(false)
    }

    fn log(&self, message: &str) {
        if !message.is_empty() {
            println!("[{}] {}", self.define_log_tag(), message);
        }
    }
}

/// The default finish rule: stop after a fixed number of iterations. Logs
/// per-iteration progress and the total elapsed time on completion.
pub struct WatchIterationCount {
    target_count: usize,
    verbose: bool,
    start_time: Instant,
    last_update_time: Instant,
}

impl WatchIterationCount {
    pub fn new(target_count: usize, verbose: bool) -> Self {
        let now = Instant::now();
        Self {
            target_count,
            verbose,
            start_time: now,
            last_update_time: now,
        }
    }
}

impl<T: Task, V> Callback<T, V> for WatchIterationCount {
    fn define_log_tag(&self) -> String {
        "Progress".into()
    }

    fn before_gpi_start(&mut self, _task: &T, _value_function: &V) -> Result<()> {
        self.start_time = Instant::now();
        self.last_update_time = self.start_time;
        <Self as Callback<T, V>>::log(self, &format!(
            "Start training iteration for {} times",
            self.target_count
        ));
        Ok(())
    }

    fn after_update(&mut self, iteration_count: usize, _task: &T, _value_function: &V) -> Result<()> {
        if self.verbose {
            let now = Instant::now();
            <Self as Callback<T, V>>::log(self, &format!(
                "Finished {} / {} iterations ({:.1}s)",
                iteration_count,
                self.target_count,
                (now - self.last_update_time).as_secs_f64()
            ));
            self.last_update_time = now;
        }
        Ok(())
    }

    fn interrupt_gpi(
        &mut self,
        iteration_count: usize,
        _task: &T,
        _value_function: &V,
    ) -> Result<bool> {
        let finished = iteration_count >= self.target_count;
        if finished {
            <Self as Callback<T, V>>::log(self, &format!(
                "Completed training iteration for {} times. (total time: {}s)",
                iteration_count,
                self.start_time.elapsed().as_secs()
            ));
        }
        Ok(finished)
    }
}

const INTERRUPTION_WORD: &str = "stop";

/// Cooperative cancellation: polls a watch file at a bounded interval and
/// stops the run at the next iteration boundary once the file contains the
/// word "stop". Never preempts an in-flight episode.
pub struct ManualInterruption {
    monitor_file_path: PathBuf,
    watch_interval: Duration,
    last_check_time: Instant,
}

impl ManualInterruption {
    pub fn new(monitor_file_path: PathBuf, watch_interval: Duration) -> Self {
        Self {
            monitor_file_path,
            watch_interval,
            last_check_time: Instant::now(),
        }
    }

    fn order_found_in_monitoring_file(&self) -> bool {
        match std::fs::read_to_string(&self.monitor_file_path) {
            Ok(content) => content.contains(INTERRUPTION_WORD),
            Err(_) => false,
        }
    }
}

impl<T: Task, V> Callback<T, V> for ManualInterruption {
    fn define_log_tag(&self) -> String {
        "ManualInterruption".into()
    }

    fn before_gpi_start(&mut self, _task: &T, _value_function: &V) -> Result<()> {
        self.last_check_time = Instant::now();
        <Self as Callback<T, V>>::log(self, &format!(
            "Writing the word \"{}\" on file [ {} ] will finish the training \
             (the file is checked every {:.0}s, stopping can take that long)",
            INTERRUPTION_WORD,
            self.monitor_file_path.display(),
            self.watch_interval.as_secs_f64()
        ));
        Ok(())
    }

    fn interrupt_gpi(
        &mut self,
        iteration_count: usize,
        _task: &T,
        _value_function: &V,
    ) -> Result<bool> {
        if self.last_check_time.elapsed() < self.watch_interval {
            return Ok(false);
        }
        self.last_check_time = Instant::now();
        let found = self.order_found_in_monitoring_file();
        if found {
            <Self as Callback<T, V>>::log(self, &format!(
                "Interrupt training after {} iterations because an interruption order was found in [ {} ]",
                iteration_count,
                self.monitor_file_path.display()
            ));
        }
        Ok(found)
    }
}

/// Checkpointing callback: saves the value function into a numbered
/// subdirectory every `save_interval` iterations and once more when the run
/// finishes.
pub struct LearningRecorder {
    root_save_dir_path: PathBuf,
    save_interval: usize,
}

impl LearningRecorder {
    pub fn new(root_save_dir_path: PathBuf, save_interval: usize) -> Self {
        Self {
            root_save_dir_path,
            save_interval,
        }
    }
}

impl<T: Task, V: ActionValueFunction<T>> Callback<T, V> for LearningRecorder {
    fn define_log_tag(&self) -> String {
        "LearningRecorder".into()
    }

    fn before_gpi_start(&mut self, _task: &T, _value_function: &V) -> Result<()> {
        if !self.root_save_dir_path.exists() {
            bail!(
                "Directory [ {} ] which was passed to LearningRecorder was not found",
                self.root_save_dir_path.display()
            );
        }
        <Self as Callback<T, V>>::log(self, &format!(
            "The value function will be saved after each {} iteration under [ {} ]",
            self.save_interval,
            self.root_save_dir_path.display()
        ));
        Ok(())
    }

    fn after_update(&mut self, iteration_count: usize, _task: &T, value_function: &V) -> Result<()> {
        if iteration_count % self.save_interval != 0 {
            return Ok(());
        }
        let save_path = self
            .root_save_dir_path
            .join(format!("after_{iteration_count}_iteration"));
        std::fs::create_dir_all(&save_path).map_err(candle_core::Error::wrap)?;
        value_function.save(&save_path)?;
        <Self as Callback<T, V>>::log(self, &format!(
            "Saved the value function after {} iteration at [ {} ]",
            iteration_count,
            save_path.display()
        ));
        Ok(())
    }

    fn after_gpi_finish(&mut self, _task: &T, value_function: &V) -> Result<()> {
        let save_path = self.root_save_dir_path.join("gpi_finished");
        std::fs::create_dir_all(&save_path).map_err(candle_core::Error::wrap)?;
        value_function.save(&save_path)
    }
}

/// Runs a user supplied performance test every `test_interval` iterations and
/// keeps the results for later inspection.
pub struct PerformanceWatcher<F, R> {
    test_interval: usize,
    run_test: F,
    performance_log: Vec<R>,
}

impl<F, R> PerformanceWatcher<F, R> {
    pub fn new(test_interval: usize, run_test: F) -> Self {
        Self {
            test_interval,
            run_test,
            performance_log: Vec::new(),
        }
    }

    pub fn performance_log(&self) -> &[R] {
        &self.performance_log
    }
}

impl<T, V, F, R> Callback<T, V> for PerformanceWatcher<F, R>
where
    T: Task,
    F: FnMut(&T, &V) -> Result<R>,
    R: Display,
{
    fn define_log_tag(&self) -> String {
        "PerformanceWatcher".into()
    }

    fn before_gpi_start(&mut self, _task: &T, _value_function: &V) -> Result<()> {
        self.performance_log.clear();
        Ok(())
    }

    fn after_update(&mut self, iteration_count: usize, task: &T, value_function: &V) -> Result<()> {
        if iteration_count % self.test_interval != 0 {
            return Ok(());
        }
        let result = (self.run_test)(task, value_function)?;
        <Self as Callback<T, V>>::log(self, &format!(
            "Performance test result : {result} (nb_iteration={iteration_count})"
        ));
        self.performance_log.push(result);
        Ok(())
    }
}
