use std::collections::BTreeMap;
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use tracing::debug;

use crate::app::cancel::CancellationToken;
use crate::app::coordinator::{CommandCoordinator, NO_DEVICES_ADVISORY};
use crate::app::models::Device;

pub const STARTUP_ADVISORY: &str =
    "No devices found. If the device is already connected, recheck if USB Debugging is enabled in Developer settings!";

const SHELL_EXIT_KEY: char = 'q';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleAction {
    ListDevices,
    ListPackages,
    Install,
    Uninstall,
    Shell,
    Help,
    Exit,
    Interrupt,
    None,
}

/// Maps a key press to a menu action. Ctrl-C is always an interrupt.
pub fn action_for_key(key: KeyEvent) -> ConsoleAction {
    if is_interrupt(&key) {
        return ConsoleAction::Interrupt;
    }
    match key.code {
        KeyCode::Char(c) => match c.to_ascii_lowercase() {
            'd' => ConsoleAction::ListDevices,
            'p' => ConsoleAction::ListPackages,
            'i' => ConsoleAction::Install,
            'u' => ConsoleAction::Uninstall,
            'c' => ConsoleAction::Shell,
            'h' => ConsoleAction::Help,
            'x' => ConsoleAction::Exit,
            _ => ConsoleAction::None,
        },
        _ => ConsoleAction::None,
    }
}

fn is_interrupt(key: &KeyEvent) -> bool {
    key.modifiers.contains(KeyModifiers::CONTROL) && matches!(key.code, KeyCode::Char('c') | KeyCode::Char('C'))
}

/// How the interactive loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleExit {
    Quit,
    Interrupted,
}

pub trait Prompt {
    fn read_key(&mut self) -> io::Result<KeyEvent>;
    /// `None` once input is exhausted.
    fn read_line(&mut self) -> io::Result<Option<String>>;
}

/// Reads single keys in raw mode and whole lines in cooked mode.
///
/// Raw mode is only held for the duration of one key read, so a Ctrl-C typed
/// at a line prompt still reaches the process signal handler.
#[derive(Debug, Default)]
pub struct TerminalPrompt;

impl Prompt for TerminalPrompt {
    fn read_key(&mut self) -> io::Result<KeyEvent> {
        enable_raw_mode()?;
        let result = loop {
            match event::read() {
                Ok(Event::Key(key)) if key.kind == KeyEventKind::Press => break Ok(key),
                Ok(_) => continue,
                Err(err) => break Err(err),
            }
        };
        disable_raw_mode()?;
        result
    }

    fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut line = String::new();
        let read = io::stdin().lock().read_line(&mut line)?;
        if read == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }
}

pub struct Console<'a, P: Prompt, W: Write> {
    coordinator: &'a CommandCoordinator,
    prompt: P,
    out: W,
    shell_timeout: Duration,
}

impl<'a, P: Prompt, W: Write> Console<'a, P, W> {
    pub fn new(coordinator: &'a CommandCoordinator, prompt: P, out: W, shell_timeout: Duration) -> Self {
        Self {
            coordinator,
            prompt,
            out,
            shell_timeout,
        }
    }

    fn say(&mut self, message: &str) -> io::Result<()> {
        if message.is_empty() {
            return Ok(());
        }
        writeln!(self.out, ">> {message}")?;
        self.out.flush()
    }

    fn ask(&mut self, message: &str) -> io::Result<String> {
        self.say(message)?;
        Ok(self.prompt.read_line()?.unwrap_or_default().trim().to_string())
    }

    fn advise_if_empty(&mut self) -> io::Result<()> {
        if self.coordinator.registry().is_empty() {
            self.say(NO_DEVICES_ADVISORY)?;
        }
        Ok(())
    }

    pub fn print_startup_advisory(&mut self) -> io::Result<()> {
        if self.coordinator.registry().is_empty() {
            self.say(STARTUP_ADVISORY)?;
        }
        Ok(())
    }

    pub fn print_menu(&mut self) -> io::Result<()> {
        self.say("press 'd' to display all connected devices on this pc.")?;
        self.say("press 'p' to display installed packages on the device.")?;
        self.say("press 'i' to install a package onto the device.")?;
        self.say("press 'u' to uninstall a package from the device.")?;
        self.say("press 'c' for interactive command processing.")?;
        self.say("press 'h' to show this menu again.")?;
        self.say("press 'x' to exit.")
    }

    /// Runs until the operator exits or interrupts.
    pub fn run(&mut self) -> io::Result<ConsoleExit> {
        self.print_menu()?;
        loop {
            let key = self.prompt.read_key()?;
            let action = action_for_key(key);
            debug!(?action, "console key");
            match action {
                ConsoleAction::ListDevices => {
                    self.advise_if_empty()?;
                    self.display_devices()?;
                }
                ConsoleAction::ListPackages => self.list_packages()?,
                ConsoleAction::Install => self.install()?,
                ConsoleAction::Uninstall => self.uninstall()?,
                ConsoleAction::Shell => {
                    if self.shell()? == Some(ConsoleExit::Interrupted) {
                        return Ok(ConsoleExit::Interrupted);
                    }
                }
                ConsoleAction::Help => self.print_menu()?,
                ConsoleAction::Exit => return Ok(ConsoleExit::Quit),
                ConsoleAction::Interrupt => return Ok(ConsoleExit::Interrupted),
                ConsoleAction::None => {}
            }
        }
    }

    fn display_devices(&mut self) -> io::Result<()> {
        let devices = self.coordinator.registry().snapshot();
        for (index, device) in devices.iter().enumerate() {
            self.say(&format!("{} | {} | [{}]", index + 1, device.serial, device.state))?;
        }
        Ok(())
    }

    /// Lists devices and resolves a 1-based index typed by the operator.
    fn select_device(&mut self) -> io::Result<Option<Device>> {
        self.display_devices()?;
        let answer = self.ask("Enter the Number of the device you want to execute commands on: ")?;
        let Ok(index) = answer.parse::<usize>() else {
            self.say("Invalid selection; run again!")?;
            return Ok(None);
        };
        let Some(device) = self.coordinator.registry().device_at(index) else {
            self.say("Such a device doesn't exist in the index.")?;
            return Ok(None);
        };
        self.say(&format!("Selected device: {}", device.name))?;
        Ok(Some(device))
    }

    fn list_packages(&mut self) -> io::Result<()> {
        self.advise_if_empty()?;
        let Some(device) = self.select_device()? else {
            return Ok(());
        };
        let packages = self
            .coordinator
            .list_packages(Some(&device.serial))
            .unwrap_or_else(BTreeMap::new);
        if packages.is_empty() {
            return self.say("No packages can be found on the device.");
        }
        for (name, apk_path) in &packages {
            self.say(&format!("{name} | {apk_path}"))?;
        }
        Ok(())
    }

    fn install(&mut self) -> io::Result<()> {
        self.advise_if_empty()?;
        let Some(device) = self.select_device()? else {
            return Ok(());
        };
        let apk_path = self.ask("Enter the APK file path: ")?;
        if apk_path.is_empty() {
            return self.say("Invalid path.");
        }
        if !Path::new(&apk_path).is_file() {
            return self.say("Such a file doesn't exist.");
        }
        self.say(&format!("APK File path: {apk_path}"))?;
        let installed = self.coordinator.install_package(Some(&device.serial), &apk_path);
        self.report(installed)
    }

    fn uninstall(&mut self) -> io::Result<()> {
        self.advise_if_empty()?;
        let Some(device) = self.select_device()? else {
            return Ok(());
        };
        let package_name = self.ask("Enter the package name: ")?;
        if package_name.is_empty() {
            return self.say("Invalid package name.");
        }
        self.say(&format!("Package: {package_name}"))?;
        let removed = self.coordinator.uninstall_package(Some(&device.serial), &package_name);
        self.report(removed)
    }

    fn report(&mut self, succeeded: bool) -> io::Result<()> {
        if succeeded {
            self.say("Operation completed successfully!")
        } else {
            self.say("Operation failed.")
        }
    }

    /// Interactive command loop against one device. Any key opens a command
    /// prompt; `q` returns to the menu.
    fn shell(&mut self) -> io::Result<Option<ConsoleExit>> {
        self.advise_if_empty()?;
        self.say("Starting interactive command processor...")?;
        let Some(device) = self.select_device()? else {
            return Ok(None);
        };
        self.say("Press any key to Initiate command processor...")?;

        loop {
            let key = self.prompt.read_key()?;
            if is_interrupt(&key) {
                return Ok(Some(ConsoleExit::Interrupted));
            }
            if matches!(key.code, KeyCode::Char(c) if c.eq_ignore_ascii_case(&SHELL_EXIT_KEY)) {
                return Ok(None);
            }

            write!(self.out, "CMD >>> ")?;
            self.out.flush()?;
            let command = self.prompt.read_line()?.unwrap_or_default();
            if command.trim().is_empty() {
                self.say(&format!(
                    "Invalid command. Try again or press '{SHELL_EXIT_KEY}' to exit the command processor."
                ))?;
                continue;
            }

            self.say("Processing...")?;
            let token = CancellationToken::with_timeout(self.shell_timeout);
            match self
                .coordinator
                .execute_command(Some(&device.serial), &command, &token)
                .filter(|output| !output.trim().is_empty())
            {
                Some(output) => {
                    write!(self.out, "RESULT >>> {output}")?;
                    if !output.ends_with('\n') {
                        writeln!(self.out)?;
                    }
                    self.out.flush()?;
                }
                None => self.say("There is no result to display.")?,
            }
        }
    }
}
