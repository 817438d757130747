use std::{io::stdout, io::Write};

pub trait Progress {
    fn stage(&mut self, text: &str);
    fn set_total(&mut self, total: usize);
    fn progress(&mut self, step: bool, text: &str);
}

pub struct ProgressConsole {
    pos: usize,
    total: usize,
    prev_percent: usize,
    prev_text: String,
}

impl ProgressConsole {
    pub fn new() -> ProgressConsole {
        ProgressConsole {
            pos: 0,
            total: 1,
            prev_percent: 101,
            prev_text: String::new()
        }
    }

    fn show_progress(&mut self, text: &str) {
        const MAX_WIDTH: usize = 42;
        let total = self.total.max(1);
        let width = (MAX_WIDTH * self.pos / total).min(MAX_WIDTH);
        let percent = (100 * self.pos / total).min(100);
        if percent == self.prev_percent && text == self.prev_text {
            return;
        }
        if self.prev_percent > percent { println!(); }
        print!("{:3}% [", percent);
        for _ in 0..width { print!("#"); }
        for _ in width..MAX_WIDTH { print!("-"); }
        print!("] {}                   \r", text);
        let _ = stdout().flush();
        if text != self.prev_text { log::info!("{}", text); }
        self.prev_text = text.to_string();
        self.prev_percent = percent;
    }
}

impl Progress for ProgressConsole {
    fn stage(&mut self, text: &str) {
        if self.pos != 0 {
            println!();
            self.pos = 0;
        }
        println!("{}", text);
        log::info!("{}", text);
    }

    fn set_total(&mut self, total: usize) {
        self.total = total;
        self.pos = 0;
    }

    fn progress(&mut self, step: bool, text: &str) {
        if step { self.pos += 1; }
        self.show_progress(text);
        if self.pos >= self.total { println!(); }
    }
}

/// Progress that only writes into log
pub struct ProgressLog;

impl Progress for ProgressLog {
    fn stage(&mut self, text: &str) {
        log::info!("{}", text);
    }

    fn set_total(&mut self, _total: usize) {}

    fn progress(&mut self, _step: bool, text: &str) {
        log::info!("{}", text);
    }
}
